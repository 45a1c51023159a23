//! Shared fixtures for integration tests
//!
//! Builds DynamoDB-style stream records from plain JSON and runs them
//! through an engine backed by the in-memory store.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use searchsync_core::{
    CascadePlan, CascadePlanner, DocumentTask, EngineConfig, EntityConfig, InMemoryIndexStore, InboundRecord,
    IndexWriter, Normalized, Normalizer, RecordReport, Relationship, SyncEngine, WriteOutcome, WriteTask,
};
use serde_json::{json, Map, Value};

pub const SOURCE_ARN: &str = "arn:aws:dynamodb:us-east-1:123456789012:table/entities/stream/2024-01-01T00:00:00.000";

/// person/socialMediaProfile and launch/release/task
pub fn entities() -> Vec<EntityConfig> {
    vec![
        EntityConfig::new("person", "people").has_many(Relationship::new(
            "socialMediaProfiles",
            "personId",
            "socialMediaProfile",
        )),
        EntityConfig::new("socialMediaProfile", "social-media-profiles"),
        EntityConfig::new("launch", "launches").has_many(Relationship::new("releases", "launchId", "release")),
        EntityConfig::new("release", "releases").belongs_to(Relationship::new("launch", "launchId", "launch")),
        EntityConfig::new("task", "tasks")
            .belongs_to(Relationship::new("launch", "launchId", "launch"))
            .belongs_to(Relationship::new("release", "releaseId", "release")),
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
// Stream records
// ═══════════════════════════════════════════════════════════════════════════

/// Encode plain JSON as a DynamoDB attribute value
pub fn marshall(value: &Value) -> Value {
    match value {
        Value::String(s) => json!({ "S": s }),
        Value::Number(n) => json!({ "N": n.to_string() }),
        Value::Bool(b) => json!({ "BOOL": b }),
        Value::Null => json!({ "NULL": true }),
        Value::Array(items) => json!({ "L": items.iter().map(marshall).collect::<Vec<_>>() }),
        Value::Object(map) => json!({ "M": image(map) }),
    }
}

fn image(attributes: &Map<String, Value>) -> Value {
    Value::Object(
        attributes
            .iter()
            .map(|(name, value)| (name.clone(), marshall(value)))
            .collect(),
    )
}

fn record(event_name: &str, token: u64, new: Option<&Value>, old: Option<&Value>) -> Value {
    let identity = new.or(old).and_then(Value::as_object).cloned().unwrap_or_default();
    let pk = format!(
        "{}#{}",
        identity.get("entityType").and_then(Value::as_str).unwrap_or(""),
        identity.get("id").and_then(Value::as_str).unwrap_or("")
    );

    let mut dynamodb = json!({
        "Keys": { "pk": { "S": pk } },
        "SequenceNumber": token.to_string(),
        "StreamViewType": "NEW_AND_OLD_IMAGES"
    });
    if let Some(Value::Object(new)) = new {
        dynamodb["NewImage"] = image(new);
    }
    if let Some(Value::Object(old)) = old {
        dynamodb["OldImage"] = image(old);
    }

    json!({
        "eventID": format!("evt-{}", token),
        "eventName": event_name,
        "eventVersion": "1.1",
        "eventSource": "aws:dynamodb",
        "awsRegion": "us-east-1",
        "eventSourceARN": SOURCE_ARN,
        "dynamodb": dynamodb
    })
}

pub fn insert_record(token: u64, new: &Value) -> String {
    record("INSERT", token, Some(new), None).to_string()
}

pub fn modify_record(token: u64, new: &Value, old: &Value) -> String {
    record("MODIFY", token, Some(new), Some(old)).to_string()
}

pub fn remove_record(token: u64, old: &Value) -> String {
    record("REMOVE", token, None, Some(old)).to_string()
}

/// Marker written by the record with `token`
pub fn marker(token: u64, kind: &str) -> Value {
    json!({
        "orderingToken": token.to_string(),
        "eventId": format!("evt-{}", token),
        "eventKind": kind,
        "sourceRef": SOURCE_ARN
    })
}

/// `attributes` plus the `_sync` marker of `token`
pub fn stamped(attributes: &Value, token: u64) -> Value {
    let mut stamped = attributes.clone();
    stamped["_sync"] = marker(token, "upsert");
    stamped
}

pub fn launch(id: &str, name: &str) -> Value {
    json!({ "id": id, "entityType": "launch", "name": name })
}

pub fn release(id: &str, launch_id: &str, name: &str) -> Value {
    json!({ "id": id, "entityType": "release", "launchId": launch_id, "name": name })
}

pub fn task(id: &str, launch_id: &str, release_id: &str) -> Value {
    json!({ "id": id, "entityType": "task", "launchId": launch_id, "releaseId": release_id, "title": format!("task {}", id) })
}

// ═══════════════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════════════

pub struct Harness {
    pub store: Arc<InMemoryIndexStore>,
    pub engine: SyncEngine,
    messages: AtomicUsize,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::new(entities()))
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryIndexStore::new());
        let engine = SyncEngine::from_config(&config, store.clone()).expect("valid engine config");
        Self {
            store,
            engine,
            messages: AtomicUsize::new(0),
        }
    }

    pub fn message(&self, body: String) -> InboundRecord {
        let n = self.messages.fetch_add(1, Ordering::Relaxed);
        InboundRecord::raw(format!("msg-{}", n), body)
    }

    pub async fn send(&self, body: String) -> RecordReport {
        let message = self.message(body);
        self.engine.process_record(&message).await
    }

    pub async fn upsert(&self, token: u64, attributes: &Value) -> RecordReport {
        self.send(insert_record(token, attributes)).await
    }

    pub async fn modify(&self, token: u64, new: &Value, old: &Value) -> RecordReport {
        self.send(modify_record(token, new, old)).await
    }

    pub async fn remove(&self, token: u64, old: &Value) -> RecordReport {
        self.send(remove_record(token, old)).await
    }

    pub fn doc(&self, index: &str, id: &str) -> Option<Value> {
        self.store.document(index, id).map(Value::Object)
    }

    /// Ids of the entries embedded under `property`
    pub fn entry_ids(&self, index: &str, id: &str, property: &str) -> Option<Vec<String>> {
        let doc = self.doc(index, id)?;
        let entries = doc.get(property)?.as_array()?.clone();
        Some(
            entries
                .iter()
                .filter_map(|e| e.get("id").and_then(Value::as_str).map(String::from))
                .collect(),
        )
    }
}

/// Store contents as a reader sees them: removal records and empty
/// embedded lists dropped
pub fn visible(store: &InMemoryIndexStore) -> BTreeMap<(String, String), Value> {
    store
        .snapshot()
        .into_iter()
        .map(|(key, mut doc)| {
            doc.remove("_removed");
            doc.retain(|_, v| !matches!(v, Value::Array(items) if items.is_empty()));
            (key, Value::Object(doc))
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Task-level stepping
// ═══════════════════════════════════════════════════════════════════════════

enum Pending {
    Resolve(WriteTask),
    Apply(DocumentTask),
}

/// One event part-way through its writes
pub struct InFlight {
    plan: Option<CascadePlan>,
    queue: VecDeque<Pending>,
}

impl InFlight {
    pub fn is_done(&self) -> bool {
        self.plan.is_none() && self.queue.is_empty()
    }
}

/// Runs events one store call at a time, so the writes of several events
/// can be interleaved in any order
pub struct Stepper {
    pub store: Arc<InMemoryIndexStore>,
    normalizer: Normalizer,
    planner: CascadePlanner,
    writer: IndexWriter,
}

impl Stepper {
    pub fn new() -> Self {
        let config = EngineConfig::new(entities());
        let catalog = Arc::new(config.catalog().expect("valid catalog"));
        let store = Arc::new(InMemoryIndexStore::new());
        Self {
            normalizer: Normalizer::new(catalog.clone(), config.record.clone()),
            planner: CascadePlanner::new(catalog.clone()),
            writer: IndexWriter::new(store.clone(), catalog, config.writer.clone(), config.search.clone()),
            store,
        }
    }

    pub fn start(&self, body: &str) -> InFlight {
        let event = match self.normalizer.normalize_json(body) {
            Normalized::Event(event) => event,
            Normalized::Skip(reason) => panic!("record skipped: {}", reason),
        };
        InFlight {
            plan: Some(self.planner.plan(&event).expect("plannable event")),
            queue: VecDeque::new(),
        }
    }

    /// Run the next store call of `event`: the primary write first, then one
    /// cascade resolution or document write per call
    pub async fn step(&self, event: &mut InFlight) {
        if let Some(plan) = event.plan.take() {
            let mut outcome = WriteOutcome::NotFound;
            for task in self.writer.resolve(&plan.primary).await.expect("primary resolves") {
                outcome = self.writer.apply(&task).await.expect("primary applies");
            }
            event
                .queue
                .extend(plan.cascade_after(outcome).into_iter().cloned().map(Pending::Resolve));
            return;
        }

        match event.queue.pop_front() {
            Some(Pending::Resolve(task)) => {
                let documents = self.writer.resolve(&task).await.expect("cascade resolves");
                event.queue.extend(documents.into_iter().map(Pending::Apply));
            }
            Some(Pending::Apply(task)) => {
                self.writer.apply(&task).await.expect("cascade write applies");
            }
            None => {}
        }
    }

    pub async fn finish(&self, event: &mut InFlight) {
        while !event.is_done() {
            self.step(event).await;
        }
    }

    /// Start and finish `body` before anything else runs
    pub async fn run(&self, body: &str) {
        let mut event = self.start(body);
        self.finish(&mut event).await;
    }

    /// Ids of the entries embedded under `property`
    pub fn entry_ids(&self, index: &str, id: &str, property: &str) -> Option<Vec<String>> {
        let doc = self.store.document(index, id)?;
        let entries = doc.get(property)?.as_array()?.clone();
        Some(
            entries
                .iter()
                .filter_map(|e| e.get("id").and_then(Value::as_str).map(String::from))
                .collect(),
        )
    }
}
