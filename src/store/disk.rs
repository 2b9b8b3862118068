use crate::core::store::{Apply, Collection, Document, Filter};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use fjall::PartitionHandle;
use std::marker::PhantomData;
use tokio::sync::Mutex;
use tracing::debug;

/// Collection stored in one fjall partition, one JSON document per key.
pub struct DiskCollection<T: Document> {
    name: String,
    partition: PartitionHandle,
    // Serializes read-modify-write cycles; fjall itself only orders single writes.
    write_lock: Mutex<()>,
    _marker: PhantomData<T>,
}

impl<T: Document> DiskCollection<T> {
    pub fn new(name: &str, partition: PartitionHandle) -> Self {
        Self {
            name: name.to_string(),
            partition,
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    fn read(&self, id: &str) -> Result<Option<T>> {
        match self.partition.get(id.as_bytes())? {
            Some(bytes) => {
                let doc = serde_json::from_slice(&bytes).with_context(|| {
                    format!("Corrupt document {} in collection {}", id, self.name)
                })?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    fn write(&self, doc: &T) -> Result<()> {
        self.partition
            .insert(doc.id().as_bytes(), serde_json::to_vec(doc)?)?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<T>> {
        let mut docs = Vec::new();
        for item in self.partition.iter() {
            let (key, value) = item?;
            match serde_json::from_slice::<T>(&value) {
                Ok(doc) => docs.push(doc),
                Err(e) => debug!(
                    "Skipping unreadable document {:?} in {}: {}",
                    String::from_utf8_lossy(&key),
                    self.name,
                    e
                ),
            }
        }
        Ok(docs)
    }
}

#[async_trait]
impl<T: Document> Collection<T> for DiskCollection<T> {
    async fn find(&self, filter: Filter<'_, T>) -> Result<Vec<T>> {
        Ok(self.scan()?.into_iter().filter(|doc| filter(doc)).collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        self.read(id)
    }

    async fn insert(&self, doc: T) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        if self.partition.contains_key(doc.id().as_bytes())? {
            bail!("Duplicate id {} in collection {}", doc.id(), self.name);
        }
        self.write(&doc)?;
        debug!(collection = %self.name, id = %doc.id(), "INSERT");
        Ok(doc)
    }

    async fn update(&self, id: &str, apply: Apply<'_, T>, upsert: Option<T>) -> Result<Option<T>> {
        let _guard = self.write_lock.lock().await;
        let mut doc = match self.read(id)?.or(upsert) {
            Some(doc) => doc,
            None => return Ok(None),
        };
        apply(&mut doc);
        self.write(&doc)?;
        debug!(collection = %self.name, id = %id, "UPDATE");
        Ok(Some(doc))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let existed = self.partition.contains_key(id.as_bytes())?;
        self.partition.remove(id.as_bytes())?;
        debug!(collection = %self.name, id = %id, "DELETE");
        Ok(existed)
    }

    async fn delete_many(&self, filter: Filter<'_, T>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let doomed: Vec<T> = self.scan()?.into_iter().filter(|doc| filter(doc)).collect();
        for doc in &doomed {
            self.partition.remove(doc.id().as_bytes())?;
        }
        Ok(doomed.len())
    }
}
