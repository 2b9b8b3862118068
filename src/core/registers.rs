//! Named running totals and reference rates.

use super::error::{ServiceResult, ensure_finite};
use super::models::ConfigEntry;
use super::store::Collection;
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

/// Access to [`ConfigEntry`] registers.
///
/// Every mutation is a single store-level read-modify-write, so concurrent
/// increments of the same register never lose updates.
#[derive(Clone)]
pub struct RegisterBook {
    entries: Arc<dyn Collection<ConfigEntry>>,
}

impl RegisterBook {
    pub fn new(entries: Arc<dyn Collection<ConfigEntry>>) -> Self {
        Self { entries }
    }

    pub async fn get(&self, name: &str) -> Result<Option<f64>> {
        Ok(self.entries.find_by_id(name).await?.map(|e| e.total))
    }

    /// Value of the first register in `names` that exists.
    pub async fn first_present(&self, names: &[String]) -> Result<Option<(String, f64)>> {
        for name in names {
            if let Some(total) = self.get(name).await? {
                debug!(register = %name, total, "Resolved register");
                return Ok(Some((name.clone(), total)));
            }
        }
        Ok(None)
    }

    pub async fn set(&self, name: &str, value: f64) -> ServiceResult<f64> {
        let value = ensure_finite(name, value)?;
        let entry = self
            .entries
            .update(name, &|e| e.total = value, Some(ConfigEntry::new(name, 0.0)))
            .await?;
        Ok(entry.map_or(value, |e| e.total))
    }

    /// Atomically adds `delta`, creating the register at zero if needed.
    pub async fn add(&self, name: &str, delta: f64) -> ServiceResult<f64> {
        let delta = ensure_finite(name, delta)?;
        let entry = self
            .entries
            .update(name, &|e| e.total += delta, Some(ConfigEntry::new(name, 0.0)))
            .await?;
        Ok(entry.map_or(delta, |e| e.total))
    }

    pub async fn all(&self) -> Result<Vec<ConfigEntry>> {
        self.entries.all().await
    }
}
