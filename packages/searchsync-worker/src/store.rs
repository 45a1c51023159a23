//! Index store selection

use std::sync::Arc;

use searchsync_core::{EngineConfig, IndexStore, InMemoryIndexStore, OpenSearchStore};
use tracing::info;

use crate::error::{Result, WorkerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    OpenSearch,
    /// Process-local store, for dry runs
    InMemory,
}

pub fn build_store(kind: StoreKind, config: &EngineConfig) -> Result<Arc<dyn IndexStore>> {
    match kind {
        StoreKind::InMemory => {
            info!("using in-memory index store");
            Ok(Arc::new(InMemoryIndexStore::new()))
        }
        StoreKind::OpenSearch => {
            let opensearch = config
                .opensearch
                .as_ref()
                .ok_or_else(|| WorkerError::config("opensearch endpoint is not configured"))?;
            let store = OpenSearchStore::from_config(opensearch, config.writer.request_timeout())?;
            info!(endpoint = %opensearch.base_url(), "using OpenSearch index store");
            Ok(Arc::new(store))
        }
    }
}
