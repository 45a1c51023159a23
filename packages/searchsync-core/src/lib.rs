//! searchsync-core - Denormalizing change-stream to search-index sync
//!
//! Consumes batches of change-capture records from a key-value store and
//! keeps a search index in sync, embedding related entities into each
//! other's documents according to a declared relationship catalog.
//!
//! ## Pipeline
//!
//! ```text
//! raw record ─▶ Normalizer ─▶ ChangeEvent ─▶ CascadePlanner ─▶ WriteTasks
//!                                                               │
//!                              IndexStore ◀─ IndexWriter ◀──────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Conditional writes**: every document, and every embedded entry,
//!    carries a `_sync` marker; a write applies only if its ordering token
//!    is not older than the stored one
//! 2. **Atomic per document**: the comparison runs inside the store
//!    (per-key lock or scripted update), never read-then-write from here
//! 3. **Record-level retry**: failed records are reported for redelivery
//!    and replayed whole; idempotence makes replays safe
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use searchsync_core::{EngineConfig, InMemoryIndexStore, InboundRecord, SyncEngine};
//!
//! let config = EngineConfig::from_yaml("searchsync.yaml")?;
//! let engine = SyncEngine::from_config(&config, Arc::new(InMemoryIndexStore::new()))?;
//!
//! let report = engine
//!     .process_batch(&[InboundRecord::raw("msg-1", body)])
//!     .await;
//! for id in report.retryable_record_ids() {
//!     println!("redeliver {}", id);
//! }
//! ```

pub mod cascade;
pub mod catalog;
pub mod config;
pub mod conflict;
pub mod domain;
pub mod driver;
pub mod error;
pub mod infrastructure;
pub mod normalizer;
pub mod writer;

pub use error::{ErrorCategory, ErrorKind, Result, SyncError};

// Domain re-exports
pub use cascade::{CascadePlan, CascadePlanner, Operation, Target, WriteTask};
pub use catalog::{EntityConfig, Relationship, RelationshipCatalog};
pub use config::{ConfigError, EngineConfig, RemovalMode};
pub use domain::{
    Attributes, ChangeEvent, EventKind, IndexStore, Mutation, OrderingToken, SyncMarker, WriteOutcome,
};
pub use driver::{BatchReport, InboundRecord, RecordOutcome, RecordReport, SyncEngine, TaskStats};
pub use normalizer::{Normalized, Normalizer, SkipReason, StreamRecord};
pub use writer::{DocumentTask, IndexWriter};

pub use infrastructure::InMemoryIndexStore;
#[cfg(feature = "opensearch")]
pub use infrastructure::OpenSearchStore;
