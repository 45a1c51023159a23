//! Index writer
//!
//! Resolves fan-out targets into concrete documents and turns each planned
//! operation into one conditional [`Mutation`] on the store. Every store
//! call is bounded by the configured request timeout; errors are returned
//! to the caller, never retried here.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cascade::{DocRef, Operation, Target, WriteTask};
use crate::catalog::RelationshipCatalog;
use crate::config::{RemovalMode, SearchConfig, WriterConfig};
use crate::domain::{
    is_tombstone, Attributes, IndexStore, Mutation, SyncMarker, TermQuery, WriteOutcome,
    ID_FIELD, REMOVED_FIELD, SYNC_FIELD,
};
use crate::error::{Result, SyncError};

/// A planned operation bound to one concrete document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentTask {
    pub index: String,
    pub id: String,
    pub operation: Operation,
    pub marker: SyncMarker,
}

impl DocumentTask {
    fn from_task(task: &WriteTask, index: &str, id: &str) -> Self {
        Self {
            index: index.to_string(),
            id: id.to_string(),
            operation: task.operation.clone(),
            marker: task.marker.clone(),
        }
    }
}

pub struct IndexWriter {
    store: Arc<dyn IndexStore>,
    catalog: Arc<RelationshipCatalog>,
    writer: WriterConfig,
    search: SearchConfig,
}

impl IndexWriter {
    pub fn new(
        store: Arc<dyn IndexStore>,
        catalog: Arc<RelationshipCatalog>,
        writer: WriterConfig,
        search: SearchConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            writer,
            search,
        }
    }

    /// Concrete documents a task applies to.
    ///
    /// Fan-out targets are resolved by paging through every match; a fan-out
    /// wider than `search.maxFanout` fails instead of touching a partial set.
    pub async fn resolve(&self, task: &WriteTask) -> Result<Vec<DocumentTask>> {
        match &task.target {
            Target::Document { index, id } => Ok(vec![DocumentTask::from_task(task, index, id)]),
            Target::FanOut {
                index,
                field,
                value,
            } => {
                let ids = self.matching_ids(index, field, value).await?;
                debug!(target = %task.target, matches = ids.len(), "Resolved fan-out");
                Ok(ids
                    .iter()
                    .map(|id| DocumentTask::from_task(task, index, id))
                    .collect())
            }
        }
    }

    /// Apply one document task as a conditional write
    pub async fn apply(&self, task: &DocumentTask) -> Result<WriteOutcome> {
        let Some(mutation) = self.mutation(task).await? else {
            return Ok(WriteOutcome::NotFound);
        };

        let outcome = self
            .bounded(
                self.store.update(&task.index, &task.id, &mutation),
                || format!("{} on {}/{}", mutation.name(), task.index, task.id),
            )
            .await?;

        debug!(
            index = %task.index,
            id = %task.id,
            op = task.operation.name(),
            token = %task.marker.ordering_token,
            %outcome,
            "Applied write"
        );
        Ok(outcome)
    }

    /// The mutation implementing `task`, or `None` when its source document is gone
    pub async fn mutation(&self, task: &DocumentTask) -> Result<Option<Mutation>> {
        let marker = task.marker.clone();
        let mutation = match &task.operation {
            Operation::UpsertRoot {
                attributes,
                has_many,
                belongs_to,
            } => Mutation::ReplaceRoot {
                id: task.id.clone(),
                attributes: attributes.clone(),
                marker,
                has_many: has_many.clone(),
                belongs_to: belongs_to.clone(),
            },
            Operation::RemoveRoot => Mutation::RemoveRoot {
                id: task.id.clone(),
                marker,
                tombstone: self.writer.removal_mode == RemovalMode::Tombstone,
            },
            Operation::UpsertEntry {
                property,
                entry_id,
                entry,
            } => Mutation::UpsertEntry {
                property: property.clone(),
                entry_id: entry_id.clone(),
                entry: stamped(entry, entry_id, &marker),
                marker,
            },
            Operation::RemoveEntry { property, entry_id } => Mutation::RemoveEntry {
                property: property.clone(),
                entry_id: entry_id.clone(),
                marker,
            },
            Operation::EmbedParent {
                property,
                foreign_key,
                parent_id,
                snapshot,
                refresh_only,
            } => Mutation::SetSlot {
                property: property.clone(),
                foreign_key: foreign_key.clone(),
                parent_id: parent_id.clone(),
                snapshot: stamped(snapshot, parent_id, &marker),
                marker,
                only_if_present: *refresh_only,
            },
            Operation::EmbedParentFrom {
                property,
                foreign_key,
                parent,
            } => {
                let Some((snapshot, parent_marker)) = self.parent_snapshot(parent, &marker).await? else {
                    debug!(
                        parent = %format!("{}/{}", parent.index, parent.id),
                        child = %format!("{}/{}", task.index, task.id),
                        "Parent document absent; nothing to embed"
                    );
                    return Ok(None);
                };
                Mutation::SetSlot {
                    property: property.clone(),
                    foreign_key: foreign_key.clone(),
                    parent_id: parent.id.clone(),
                    snapshot,
                    marker: parent_marker,
                    only_if_present: false,
                }
            }
            Operation::StripParent {
                property,
                parent_id,
            } => Mutation::ClearSlot {
                property: property.clone(),
                parent_id: parent_id.clone(),
                marker,
            },
        };
        Ok(Some(mutation))
    }

    /// Relationship-stripped snapshot of the stored parent, stamped with the
    /// parent's own root marker
    async fn parent_snapshot(
        &self,
        parent: &DocRef,
        fallback: &SyncMarker,
    ) -> Result<Option<(Attributes, SyncMarker)>> {
        let stored = self
            .bounded(self.store.get(&parent.index, &parent.id), || {
                format!("get {}/{}", parent.index, parent.id)
            })
            .await?;
        let Some(document) = stored.filter(|doc| !is_tombstone(doc)) else {
            return Ok(None);
        };

        let parent_marker = SyncMarker::read(&document).unwrap_or_else(|| {
            warn!(
                index = %parent.index,
                id = %parent.id,
                "Parent document has no sync marker; embedding under the child's marker"
            );
            fallback.clone()
        });

        let nested = self.catalog.relationship_properties(&parent.entity_type);
        let snapshot: Attributes = document
            .into_iter()
            .filter(|(name, _)| !nested.contains(name.as_str()) && name != SYNC_FIELD && name != REMOVED_FIELD)
            .collect();

        Ok(Some((stamped(&snapshot, &parent.id, &parent_marker), parent_marker)))
    }

    async fn matching_ids(&self, index: &str, field: &str, value: &str) -> Result<Vec<String>> {
        let field = format!("{}{}", field, self.search.keyword_suffix);
        let page_size = self.search.page_size.max(1);
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut from = 0;

        loop {
            let query = TermQuery::new(index, field.as_str(), value).page(from, page_size);
            let page = self
                .bounded(self.store.search(&query), || {
                    format!("search {}[{}={}] from {}", index, field, value, from)
                })
                .await?;
            let fetched = page.hits.len();
            // Known up front when the store counts hits; avoids paging past the result window
            if page.total.is_some_and(|total| total > self.search.max_fanout as u64) {
                return Err(SyncError::fanout_limit(index, &field, self.search.max_fanout));
            }

            for hit in page.hits {
                if seen.insert(hit.id.clone()) {
                    ids.push(hit.id);
                }
            }
            if ids.len() > self.search.max_fanout {
                return Err(SyncError::fanout_limit(index, &field, self.search.max_fanout));
            }

            from += fetched;
            let exhausted = page.total.is_some_and(|total| from as u64 >= total);
            if fetched < page_size || exhausted {
                break;
            }
        }
        Ok(ids)
    }

    async fn bounded<T, F, D>(&self, call: F, describe: D) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        D: FnOnce() -> String,
    {
        let timeout = self.writer.request_timeout();
        tokio::time::timeout(timeout, call).await.map_err(|_| {
            SyncError::timeout(format!("{} exceeded {}ms", describe(), timeout.as_millis()))
        })?
    }
}

/// Payload with its identity and the marker guarding it
fn stamped(payload: &Attributes, id: &str, marker: &SyncMarker) -> Attributes {
    let mut stamped = payload.clone();
    stamped.insert(ID_FIELD.into(), Value::String(id.to_string()));
    stamped.insert(SYNC_FIELD.into(), marker.to_value());
    stamped
}
