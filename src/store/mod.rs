pub mod disk;
pub mod memory;

use crate::core::models::{Asset, CandleSeries, ConfigEntry, Exchange, Transaction};
use crate::core::store::{Collection, Document};
use anyhow::{Context, Result};
use disk::DiskCollection;
use fjall::{Keyspace, PartitionCreateOptions};
use memory::MemoryCollection;
use std::path::Path;
use std::sync::Arc;

/// One collection per entity type.
pub struct Database {
    pub assets: Arc<dyn Collection<Asset>>,
    pub candles: Arc<dyn Collection<CandleSeries>>,
    pub registers: Arc<dyn Collection<ConfigEntry>>,
    pub exchanges: Arc<dyn Collection<Exchange>>,
    pub transactions: Arc<dyn Collection<Transaction>>,
    keyspace_handle: Option<Keyspace>,
}

impl Database {
    pub fn in_memory() -> Self {
        Self {
            assets: Arc::new(MemoryCollection::new("assets")),
            candles: Arc::new(MemoryCollection::new("candles")),
            registers: Arc::new(MemoryCollection::new("registers")),
            exchanges: Arc::new(MemoryCollection::new("exchanges")),
            transactions: Arc::new(MemoryCollection::new("transactions")),
            keyspace_handle: None,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory: {}", path.display()))?;
        let keyspace = fjall::Config::new(path.join("db"))
            .open()
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        Ok(Self {
            assets: disk_collection(&keyspace, "assets")?,
            candles: disk_collection(&keyspace, "candles")?,
            registers: disk_collection(&keyspace, "registers")?,
            exchanges: disk_collection(&keyspace, "exchanges")?,
            transactions: disk_collection(&keyspace, "transactions")?,
            keyspace_handle: Some(keyspace),
        })
    }

    /// Forces buffered writes to disk; a no-op for in-memory databases.
    pub fn flush(&self) -> Result<()> {
        if let Some(keyspace) = &self.keyspace_handle {
            keyspace.persist(fjall::PersistMode::SyncAll)?;
        }
        Ok(())
    }
}

fn disk_collection<T: Document>(keyspace: &Keyspace, name: &str) -> Result<Arc<dyn Collection<T>>> {
    let partition = keyspace
        .open_partition(name, PartitionCreateOptions::default())
        .with_context(|| format!("Failed to open partition {name}"))?;
    Ok(Arc::new(DiskCollection::new(name, partition)))
}
