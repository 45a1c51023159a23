//! In-memory index store
//!
//! Documents live in a `DashMap` keyed by `(index, id)`. Updates run
//! [`Mutation::interpret`] while holding the entry for that key, so the
//! existence check, the marker comparison and the write are one atomic step
//! per document, as they are in a scripted OpenSearch update.
//!
//! Used by tests and by the worker's `--in-memory` mode.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use serde_json::Value;

use crate::domain::{
    is_tombstone, key_of, Attributes, IndexStore, Mutation, SearchHit, SearchPage, TermQuery, Transition,
    WriteOutcome,
};
use crate::error::{Result, SyncError};

type DocKey = (String, String);

#[derive(Default)]
pub struct InMemoryIndexStore {
    documents: DashMap<DocKey, Attributes>,
    /// Indices answering every call with a transport error
    unavailable: DashSet<String>,
    get_calls: AtomicU64,
    update_calls: AtomicU64,
    search_calls: AtomicU64,
    last_query: Mutex<Option<TermQuery>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document as-is, bypassing conditional rules
    pub fn insert(&self, index: &str, id: &str, document: Attributes) {
        self.documents.insert(key(index, id), document);
    }

    /// Stored document, tombstones included
    pub fn document(&self, index: &str, id: &str) -> Option<Attributes> {
        self.documents.get(&key(index, id)).map(|doc| doc.value().clone())
    }

    /// Every stored document, ordered by `(index, id)`
    pub fn snapshot(&self) -> BTreeMap<DocKey, Attributes> {
        self.documents
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Make every call against `index` fail with a transport error
    pub fn fail_index(&self, index: &str) {
        self.unavailable.insert(index.to_string());
    }

    pub fn restore_index(&self, index: &str) {
        self.unavailable.remove(index);
    }

    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::Relaxed)
    }

    pub fn update_calls(&self) -> u64 {
        self.update_calls.load(Ordering::Relaxed)
    }

    pub fn search_calls(&self) -> u64 {
        self.search_calls.load(Ordering::Relaxed)
    }

    /// Total calls of any kind
    pub fn calls(&self) -> u64 {
        self.get_calls() + self.update_calls() + self.search_calls()
    }

    pub fn last_query(&self) -> Option<TermQuery> {
        self.last_query.lock().ok().and_then(|last| last.clone())
    }

    fn check_available(&self, index: &str) -> Result<()> {
        if self.unavailable.contains(index) {
            return Err(SyncError::transport(format!("index '{}' is unavailable", index)));
        }
        Ok(())
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn get(&self, index: &str, id: &str) -> Result<Option<Attributes>> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        self.check_available(index)?;
        Ok(self.document(index, id))
    }

    async fn update(&self, index: &str, id: &str, mutation: &Mutation) -> Result<WriteOutcome> {
        self.update_calls.fetch_add(1, Ordering::Relaxed);
        self.check_available(index)?;

        // The entry guard holds the shard lock until the transition is committed
        let outcome = match self.documents.entry(key(index, id)) {
            Entry::Occupied(mut occupied) => match mutation.interpret(Some(occupied.get())) {
                Transition::Put(document) => {
                    occupied.insert(document);
                    WriteOutcome::Applied
                }
                Transition::Delete => {
                    occupied.remove();
                    WriteOutcome::Applied
                }
                Transition::Keep(outcome) => outcome,
            },
            Entry::Vacant(vacant) => match mutation.interpret(None) {
                Transition::Put(document) => {
                    vacant.insert(document);
                    WriteOutcome::Applied
                }
                Transition::Delete => WriteOutcome::NotFound,
                Transition::Keep(outcome) => outcome,
            },
        };
        Ok(outcome)
    }

    async fn search(&self, query: &TermQuery) -> Result<SearchPage> {
        self.search_calls.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_query.lock() {
            *last = Some(query.clone());
        }
        self.check_available(&query.index)?;

        let mut matches: Vec<(String, Attributes)> = self
            .documents
            .iter()
            .filter(|entry| entry.key().0 == query.index)
            .filter(|entry| !is_tombstone(entry.value()))
            .filter(|entry| {
                field_at(entry.value(), &query.field)
                    .and_then(key_of)
                    .is_some_and(|v| v == query.value)
            })
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));

        let total = matches.len() as u64;
        let hits = matches
            .into_iter()
            .skip(query.from)
            .take(query.size)
            .map(|(id, document)| SearchHit {
                id,
                source: project(&document, &query.source_fields),
            })
            .collect();

        Ok(SearchPage {
            hits,
            total: Some(total),
        })
    }
}

fn key(index: &str, id: &str) -> DocKey {
    (index.to_string(), id.to_string())
}

/// Value at a dotted path (`launch.id`)
fn field_at<'a>(document: &'a Attributes, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn project(document: &Attributes, fields: &[String]) -> Attributes {
    fields
        .iter()
        .filter_map(|field| document.get(field).map(|v| (field.clone(), v.clone())))
        .collect()
}
