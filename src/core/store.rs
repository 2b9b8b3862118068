//! Persistent store abstractions

use anyhow::Result;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

/// A stored entity addressed by a string id.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
}

pub type Filter<'a, T> = &'a (dyn Fn(&T) -> bool + Send + Sync);
pub type Apply<'a, T> = &'a (dyn Fn(&mut T) + Send + Sync);

/// One document collection per entity type.
///
/// Each call is atomic on its own; nothing spans several calls or several
/// collections.
#[async_trait]
pub trait Collection<T: Document>: Send + Sync {
    async fn find(&self, filter: Filter<'_, T>) -> Result<Vec<T>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<T>>;

    /// Fails if a document with the same id already exists.
    async fn insert(&self, doc: T) -> Result<T>;

    /// Applies `apply` to the stored document under the collection lock.
    ///
    /// When the id is absent and `upsert` is given, `apply` runs against the
    /// upsert document and the result is inserted. Returns `None` when nothing
    /// was found and no upsert document was supplied.
    async fn update(&self, id: &str, apply: Apply<'_, T>, upsert: Option<T>) -> Result<Option<T>>;

    async fn delete(&self, id: &str) -> Result<bool>;

    async fn delete_many(&self, filter: Filter<'_, T>) -> Result<usize>;

    async fn all(&self) -> Result<Vec<T>> {
        self.find(&|_| true).await
    }
}
