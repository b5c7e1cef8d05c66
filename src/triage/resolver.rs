//! Batch resolver — picks the batch an operation targets when none is given.

use std::sync::Arc;

use crate::error::TriageError;
use crate::store::TriageStore;

#[derive(Clone)]
pub struct BatchResolver {
    store: Arc<dyn TriageStore>,
}

impl BatchResolver {
    pub fn new(store: Arc<dyn TriageStore>) -> Self {
        Self { store }
    }

    /// Most recently created batch, if any.
    pub async fn latest(&self) -> Result<Option<String>, TriageError> {
        Ok(self.store.latest_batch_id().await?)
    }

    /// Most recently created batch, or `NoBatchFound`.
    pub async fn require(&self) -> Result<String, TriageError> {
        self.latest().await?.ok_or(TriageError::NoBatchFound)
    }

    /// An explicit, non-blank batch id is returned as given; otherwise the latest.
    pub async fn resolve(&self, batch_id: Option<&str>) -> Result<String, TriageError> {
        match batch_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Ok(id.to_string()),
            None => self.require().await,
        }
    }
}
