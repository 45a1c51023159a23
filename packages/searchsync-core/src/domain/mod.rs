//! Domain layer
//!
//! # Domain Models
//!
//! - `OrderingToken`: totally ordered stream position used to pick the newer write
//! - `SyncMarker`: bookkeeping of the last change applied to a document or embedded entry
//! - `ChangeEvent`: one normalized mutation of one entity
//!
//! # Port Trait
//!
//! - `IndexStore`: the downstream search index (conditional update, point read, term search)
//!
//! Documents are plain JSON objects. The reserved `_sync` field holds the
//! marker of the root document; every embedded relationship entry carries
//! its own `_sync`. The reserved `_removed` field remembers which embedded
//! entries and slots were stripped, and by which change.

pub mod mutation;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

pub use mutation::{Mutation, SlotBinding, Transition};

/// JSON object holding a document or an entity image
pub type Attributes = serde_json::Map<String, Value>;

/// Field holding the identity of documents and embedded entries
pub const ID_FIELD: &str = "id";

/// Reserved field holding a `SyncMarker`
pub const SYNC_FIELD: &str = "_sync";

/// Reserved field holding `{property: {id: SyncMarker}}` for stripped
/// embedded entries and slots
pub const REMOVED_FIELD: &str = "_removed";

// ═══════════════════════════════════════════════════════════════════════════
// Ordering
// ═══════════════════════════════════════════════════════════════════════════

/// Opaque stream position of a change.
///
/// Tokens made only of ASCII digits compare numerically, so variable-length
/// sequence numbers order correctly; anything else compares lexicographically.
///
/// ```rust
/// use searchsync_core::domain::OrderingToken;
///
/// assert!(OrderingToken::new("9") < OrderingToken::new("10"));
/// assert!(OrderingToken::new("b") > OrderingToken::new("a"));
/// assert_eq!(OrderingToken::new("007"), OrderingToken::new("7"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderingToken(String);

impl OrderingToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits without leading zeros, if the token is purely numeric
    fn numeric_digits(&self) -> Option<&str> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(self.0.trim_start_matches('0'))
    }
}

impl Ord for OrderingToken {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric_digits(), other.numeric_digits()) {
            (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for OrderingToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OrderingToken {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderingToken {}

impl fmt::Display for OrderingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Kind of change carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Upsert,
    Remove,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Upsert => "upsert",
            EventKind::Remove => "remove",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last change applied to a document root or to one embedded entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMarker {
    pub ordering_token: OrderingToken,
    #[serde(default)]
    pub event_id: String,
    pub event_kind: EventKind,
    #[serde(default)]
    pub source_ref: String,
}

impl SyncMarker {
    pub fn new(
        ordering_token: impl Into<String>,
        event_id: impl Into<String>,
        event_kind: EventKind,
        source_ref: impl Into<String>,
    ) -> Self {
        Self {
            ordering_token: OrderingToken::new(ordering_token),
            event_id: event_id.into(),
            event_kind,
            source_ref: source_ref.into(),
        }
    }

    /// Reads the marker stored under `_sync` of a document or entry.
    ///
    /// A missing or unreadable marker reads as `None`, which the conflict
    /// resolver treats as "never synced".
    pub fn read(object: &Attributes) -> Option<Self> {
        object
            .get(SYNC_FIELD)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn to_value(&self) -> Value {
        // Plain strings and an enum: serialization cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Copy of this marker with a different event kind
    pub fn with_kind(&self, event_kind: EventKind) -> Self {
        Self {
            event_kind,
            ..self.clone()
        }
    }
}

/// One normalized mutation of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub entity_type: String,
    pub entity_id: String,
    pub kind: EventKind,
    /// Image after the change (Upsert)
    pub new_attributes: Option<Attributes>,
    /// Image before the change (Remove, and Upsert of an existing item)
    pub old_attributes: Option<Attributes>,
    pub marker: SyncMarker,
}

impl ChangeEvent {
    pub fn ordering_token(&self) -> &OrderingToken {
        &self.marker.ordering_token
    }

    /// Image describing the entity's current state for this event
    pub fn current_attributes(&self) -> Option<&Attributes> {
        match self.kind {
            EventKind::Upsert => self.new_attributes.as_ref(),
            EventKind::Remove => self.old_attributes.as_ref(),
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}#{} @{}",
            self.kind, self.entity_type, self.entity_id, self.marker.ordering_token
        )
    }
}

/// Canonical key of an id or foreign-key value.
///
/// Strings and numbers identify entities; any other JSON value does not.
pub fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Canonical key of `object[field]`
pub fn key_at(object: &Attributes, field: &str) -> Option<String> {
    object.get(field).and_then(key_of)
}

/// True when the document is a tombstone left by a Remove
pub fn is_tombstone(document: &Attributes) -> bool {
    SyncMarker::read(document).is_some_and(|m| m.event_kind == EventKind::Remove)
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait: IndexStore
// ═══════════════════════════════════════════════════════════════════════════

/// Result of one conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The document was created, replaced, merged or deleted
    Applied,
    /// The stored marker is newer than the incoming token
    Stale,
    /// The target document is absent or tombstoned
    NotFound,
    /// The condition held but there was nothing to change
    Noop,
}

impl WriteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOutcome::Applied => "applied",
            WriteOutcome::Stale => "stale",
            WriteOutcome::NotFound => "not_found",
            WriteOutcome::Noop => "noop",
        }
    }
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Term query locating documents whose `field` equals `value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermQuery {
    pub index: String,
    pub field: String,
    pub value: String,
    /// Offset of the first hit
    pub from: usize,
    /// Page size
    pub size: usize,
    /// Source fields to return; empty returns ids only
    pub source_fields: Vec<String>,
}

impl TermQuery {
    pub fn new(index: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            field: field.into(),
            value: value.into(),
            from: 0,
            size: 100,
            source_fields: Vec::new(),
        }
    }

    pub fn page(mut self, from: usize, size: usize) -> Self {
        self.from = from;
        self.size = size;
        self
    }
}

/// One search hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub source: Attributes,
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    /// Total number of matches, when the store reports it
    pub total: Option<u64>,
}

/// Search index abstraction
///
/// # Implementations
///
/// - `InMemoryIndexStore`: per-key atomic updates over a concurrent map
/// - `OpenSearchStore`: scripted updates over HTTP (feature `opensearch`)
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Point read by id. Tombstones are returned as stored.
    async fn get(&self, index: &str, id: &str) -> Result<Option<Attributes>>;

    /// Apply `mutation` to document `id` atomically.
    ///
    /// The existence check, the marker comparison and the write must happen
    /// as one step in the store; callers never read-modify-write.
    async fn update(&self, index: &str, id: &str, mutation: &Mutation) -> Result<WriteOutcome>;

    /// Term search over live (non-tombstoned) documents, ordered stably so
    /// `from`/`size` paging is consistent.
    async fn search(&self, query: &TermQuery) -> Result<SearchPage>;
}
