use crate::core::store::{Apply, Collection, Document, Filter};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// In-memory collection backed by an ordered map.
pub struct MemoryCollection<T: Document> {
    name: String,
    inner: Arc<Mutex<BTreeMap<String, T>>>,
}

impl<T: Document> MemoryCollection<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}

#[async_trait]
impl<T: Document> Collection<T> for MemoryCollection<T> {
    async fn find(&self, filter: Filter<'_, T>) -> Result<Vec<T>> {
        let docs = self.inner.lock().await;
        Ok(docs.values().filter(|doc| filter(doc)).cloned().collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        let docs = self.inner.lock().await;
        Ok(docs.get(id).cloned())
    }

    async fn insert(&self, doc: T) -> Result<T> {
        let mut docs = self.inner.lock().await;
        if docs.contains_key(doc.id()) {
            bail!("Duplicate id {} in collection {}", doc.id(), self.name);
        }
        debug!(collection = %self.name, id = %doc.id(), "INSERT");
        docs.insert(doc.id().to_string(), doc.clone());
        Ok(doc)
    }

    async fn update(&self, id: &str, apply: Apply<'_, T>, upsert: Option<T>) -> Result<Option<T>> {
        let mut docs = self.inner.lock().await;
        let mut doc = match docs.get(id).cloned().or(upsert) {
            Some(doc) => doc,
            None => return Ok(None),
        };
        apply(&mut doc);
        debug!(collection = %self.name, id = %id, "UPDATE");
        docs.insert(id.to_string(), doc.clone());
        Ok(Some(doc))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut docs = self.inner.lock().await;
        debug!(collection = %self.name, id = %id, "DELETE");
        Ok(docs.remove(id).is_some())
    }

    async fn delete_many(&self, filter: Filter<'_, T>) -> Result<usize> {
        let mut docs = self.inner.lock().await;
        let before = docs.len();
        docs.retain(|_, doc| !filter(doc));
        Ok(before - docs.len())
    }
}
