//! SQS batch event and partial batch failure response

use serde::{Deserialize, Serialize};
use tracing::info;

use searchsync_core::{BatchReport, InboundRecord, SyncEngine};

use crate::error::{Result, WorkerError};

#[derive(Debug, Clone, Deserialize)]
pub struct SqsEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<SqsMessage>,
}

/// One queue message; `body` holds a JSON-encoded stream record
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqsMessage {
    pub message_id: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

impl SqsEvent {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(WorkerError::invalid_event)
    }

    pub fn inbound_records(&self) -> Vec<InboundRecord> {
        self.records
            .iter()
            .map(|m| InboundRecord::raw(m.message_id.clone(), m.body.clone()))
            .collect()
    }
}

impl BatchResponse {
    /// Messages to redeliver: records that failed with a transient error.
    /// Skipped and permanently failed records are acknowledged.
    pub fn from_report(report: &BatchReport) -> Self {
        Self {
            batch_item_failures: report
                .retryable_record_ids()
                .into_iter()
                .map(|id| BatchItemFailure {
                    item_identifier: id.to_string(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.batch_item_failures.is_empty()
    }
}

/// Process one queue batch and build the partial failure response
pub async fn handle(engine: &SyncEngine, event: &SqsEvent) -> BatchResponse {
    let records = event.inbound_records();
    let report = engine.process_batch(&records).await;
    let response = BatchResponse::from_report(&report);

    let totals = report.totals();
    info!(
        messages = records.len(),
        applied = report.applied_count(),
        skipped = report.skipped_count(),
        failed = report.failed_count(),
        redeliver = response.batch_item_failures.len(),
        writes = totals.applied,
        stale = totals.stale,
        "queue batch handled"
    );
    response
}
