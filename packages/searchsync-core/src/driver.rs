//! Batch driver
//!
//! Runs normalize → plan → write for every record of a batch. Records are
//! independent: a failing record never stops the others, and its failure is
//! reported so the caller can ask the queue to redeliver it. A record is
//! always replayed whole; the engine never retries a partial cascade.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::cascade::{CascadePlan, CascadePlanner};
use crate::catalog::RelationshipCatalog;
use crate::config::{EngineConfig, WriterConfig};
use crate::domain::{ChangeEvent, IndexStore, WriteOutcome};
use crate::error::{ErrorCategory, Result, SyncError};
use crate::normalizer::{Normalized, Normalizer, SkipReason, StreamRecord};
use crate::writer::{DocumentTask, IndexWriter};

// ═══════════════════════════════════════════════════════════════════════════
// Input
// ═══════════════════════════════════════════════════════════════════════════

/// One record of a delivered batch
#[derive(Debug, Clone)]
pub struct InboundRecord {
    /// Delivery id used to report the record back (e.g. an SQS message id)
    pub id: String,
    pub body: RecordBody,
}

#[derive(Debug, Clone)]
pub enum RecordBody {
    /// JSON-encoded stream record, as carried by a queue message
    Raw(String),
    Decoded(StreamRecord),
}

impl InboundRecord {
    pub fn raw(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: RecordBody::Raw(body.into()),
        }
    }

    pub fn decoded(id: impl Into<String>, record: StreamRecord) -> Self {
        Self {
            id: id.into(),
            body: RecordBody::Decoded(record),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Reports
// ═══════════════════════════════════════════════════════════════════════════

/// Write outcomes of one record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub applied: usize,
    pub stale: usize,
    pub not_found: usize,
    pub noop: usize,
    pub failed: usize,
}

impl TaskStats {
    pub fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Applied => self.applied += 1,
            WriteOutcome::Stale => self.stale += 1,
            WriteOutcome::NotFound => self.not_found += 1,
            WriteOutcome::Noop => self.noop += 1,
        }
    }

    pub fn merge(&mut self, other: &TaskStats) {
        self.applied += other.applied;
        self.stale += other.stale;
        self.not_found += other.not_found;
        self.noop += other.noop;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.applied + self.stale + self.not_found + self.noop + self.failed
    }
}

/// Why a record failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub errors: Vec<String>,
    /// Transient when any error is transient
    pub category: ErrorCategory,
}

impl RecordFailure {
    fn from_errors(errors: &[SyncError]) -> Self {
        let category = if errors.iter().any(SyncError::is_transient) {
            ErrorCategory::Transient
        } else {
            ErrorCategory::Permanent
        };
        Self {
            errors: errors.iter().map(|e| e.to_string()).collect(),
            category,
        }
    }
}

/// Per-record result of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Applied,
    SkippedMalformed(SkipReason),
    SkippedUnknownType(String),
    Failed(RecordFailure),
}

impl RecordOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOutcome::Applied => "applied",
            RecordOutcome::SkippedMalformed(_) => "skipped_malformed",
            RecordOutcome::SkippedUnknownType(_) => "skipped_unknown_type",
            RecordOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RecordOutcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            RecordOutcome::SkippedMalformed(_) | RecordOutcome::SkippedUnknownType(_)
        )
    }
}

impl fmt::Display for RecordOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordOutcome::SkippedMalformed(reason) => write!(f, "skipped: {}", reason),
            RecordOutcome::SkippedUnknownType(t) => write!(f, "skipped: unknown entity type '{}'", t),
            RecordOutcome::Failed(failure) => write!(
                f,
                "failed ({}): {}",
                failure.category.as_str(),
                failure.errors.join("; ")
            ),
            RecordOutcome::Applied => f.write_str("applied"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordReport {
    pub record_id: String,
    /// `entityType#id` once normalized
    pub entity: Option<String>,
    pub outcome: RecordOutcome,
    pub stats: TaskStats,
    pub duration_ms: u64,
}

/// Result of one batch, one report per input record in input order
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub records: Vec<RecordReport>,
    pub duration_ms: u64,
}

impl BatchReport {
    /// Records that failed for any reason
    pub fn failed_record_ids(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.outcome.is_failed())
            .map(|r| r.record_id.as_str())
            .collect()
    }

    /// Failed records worth redelivering
    pub fn retryable_record_ids(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| {
                matches!(
                    &r.outcome,
                    RecordOutcome::Failed(failure) if failure.category == ErrorCategory::Transient
                )
            })
            .map(|r| r.record_id.as_str())
            .collect()
    }

    pub fn applied_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome == RecordOutcome::Applied).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_skipped()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_failed()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// Write outcomes summed over all records
    pub fn totals(&self) -> TaskStats {
        let mut totals = TaskStats::default();
        for record in &self.records {
            totals.merge(&record.stats);
        }
        totals
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════

/// Sync engine context: catalog, store handle and tuning, built once by
/// the caller and shared across batches
pub struct SyncEngine {
    normalizer: Normalizer,
    planner: CascadePlanner,
    writer: IndexWriter,
    config: WriterConfig,
}

impl SyncEngine {
    pub fn new(catalog: Arc<RelationshipCatalog>, store: Arc<dyn IndexStore>, config: &EngineConfig) -> Self {
        Self {
            normalizer: Normalizer::new(catalog.clone(), config.record.clone()),
            planner: CascadePlanner::new(catalog.clone()),
            writer: IndexWriter::new(store, catalog, config.writer.clone(), config.search.clone()),
            config: config.writer.clone(),
        }
    }

    /// Validate `config`, build its catalog and wire the engine to `store`
    pub fn from_config(config: &EngineConfig, store: Arc<dyn IndexStore>) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(config.catalog()?);
        Ok(Self::new(catalog, store, config))
    }

    pub async fn process_batch(&self, records: &[InboundRecord]) -> BatchReport {
        let started = Instant::now();

        let reports: Vec<RecordReport> = stream::iter(records)
            .map(|record| self.process_record(record))
            .buffered(self.config.record_concurrency.max(1))
            .collect()
            .await;

        let report = BatchReport {
            records: reports,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        let totals = report.totals();
        info!(
            "Batch of {} records: {} applied, {} skipped, {} failed ({} writes applied, {} stale) in {}ms",
            records.len(),
            report.applied_count(),
            report.skipped_count(),
            report.failed_count(),
            totals.applied,
            totals.stale,
            report.duration_ms
        );
        report
    }

    pub async fn process_record(&self, record: &InboundRecord) -> RecordReport {
        let span = info_span!("record", id = %record.id);
        let started = Instant::now();

        async move {
            let normalized = match &record.body {
                RecordBody::Raw(body) => self.normalizer.normalize_json(body),
                RecordBody::Decoded(decoded) => self.normalizer.normalize(decoded),
            };

            let (entity, outcome, stats) = match normalized {
                Normalized::Skip(SkipReason::UnknownEntityType(entity_type)) => {
                    debug!("Skipping record for unknown entity type '{}'", entity_type);
                    (None, RecordOutcome::SkippedUnknownType(entity_type), TaskStats::default())
                }
                Normalized::Skip(reason) => {
                    warn!("Skipping malformed record: {}", reason);
                    (None, RecordOutcome::SkippedMalformed(reason), TaskStats::default())
                }
                Normalized::Event(event) => {
                    let entity = format!("{}#{}", event.entity_type, event.entity_id);
                    let (stats, errors) = self.sync_event(&event).await;
                    let outcome = if errors.is_empty() {
                        RecordOutcome::Applied
                    } else {
                        let failure = RecordFailure::from_errors(&errors);
                        error!(
                            event = %event,
                            category = failure.category.as_str(),
                            "{} of {} writes failed: {}",
                            stats.failed,
                            stats.total(),
                            failure.errors.join("; ")
                        );
                        RecordOutcome::Failed(failure)
                    };
                    (Some(entity), outcome, stats)
                }
            };

            RecordReport {
                record_id: record.id.clone(),
                entity,
                outcome,
                stats,
                duration_ms: started.elapsed().as_millis() as u64,
            }
        }
        .instrument(span)
        .await
    }

    /// Apply the primary write, then its cascade (only the removals when the
    /// primary was stale)
    pub async fn sync_event(&self, event: &ChangeEvent) -> (TaskStats, Vec<SyncError>) {
        let mut stats = TaskStats::default();
        let mut errors = Vec::new();

        let plan = match self.planner.plan(event) {
            Ok(plan) => plan,
            Err(e) => {
                stats.failed += 1;
                errors.push(e);
                return (stats, errors);
            }
        };
        debug!(event = %event, tasks = plan.len(), "Planned cascade");

        let primary = match self.apply_primary(&plan).await {
            Ok(outcome) => {
                stats.record(outcome);
                outcome
            }
            Err(e) => {
                stats.failed += 1;
                errors.push(e);
                return (stats, errors);
            }
        };

        let cascade = plan.cascade_after(primary);
        if primary == WriteOutcome::Stale {
            debug!(
                event = %event,
                removals = cascade.len(),
                "Primary write is stale; running only the cascade's removals"
            );
        }

        let concurrency = self.config.task_concurrency.max(1);

        let resolved: Vec<Result<Vec<DocumentTask>>> = stream::iter(cascade)
            .map(|task| self.writer.resolve(task))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut documents = Vec::new();
        for result in resolved {
            match result {
                Ok(tasks) => documents.extend(tasks),
                Err(e) => {
                    error!(event = %event, "Failed to resolve cascade targets: {}", e);
                    stats.failed += 1;
                    errors.push(e);
                }
            }
        }

        let outcomes: Vec<(&DocumentTask, Result<WriteOutcome>)> = stream::iter(&documents)
            .map(|task| async move { (task, self.writer.apply(task).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (task, result) in outcomes {
            match result {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    error!(
                        index = %task.index,
                        id = %task.id,
                        op = task.operation.name(),
                        "Cascade write failed: {}",
                        e
                    );
                    stats.failed += 1;
                    errors.push(e);
                }
            }
        }

        (stats, errors)
    }

    async fn apply_primary(&self, plan: &CascadePlan) -> Result<WriteOutcome> {
        let mut outcome = WriteOutcome::NotFound;
        for task in self.writer.resolve(&plan.primary).await? {
            outcome = self.writer.apply(&task).await?;
        }
        Ok(outcome)
    }
}
