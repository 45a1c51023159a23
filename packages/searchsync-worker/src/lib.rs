//! searchsync-worker - Queue-facing entry point for the sync engine
//!
//! Decodes a queue batch (SQS event JSON), runs every message body through
//! [`searchsync_core::SyncEngine`] and answers with the partial batch
//! failure response the queue uses to redeliver only the failed messages.

pub mod error;
pub mod sqs;
pub mod store;

pub use error::{Result, WorkerError};
pub use sqs::{handle, BatchItemFailure, BatchResponse, SqsEvent, SqsMessage};
pub use store::{build_store, StoreKind};
