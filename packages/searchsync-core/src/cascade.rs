//! Cascade planning
//!
//! Computes every document a change touches: the entity's own document,
//! the `hasMany` lists of its parents, the `belongsTo` slots of its
//! children and the parent snapshots embedded in its own document.
//!
//! Planning is pure. Targets that can only be found by searching (children
//! referencing this entity through a foreign key) are emitted as fan-out
//! targets and resolved by the writer.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::catalog::{EntityConfig, RelationshipCatalog};
use crate::domain::{key_at, Attributes, ChangeEvent, EventKind, SlotBinding, SyncMarker, WriteOutcome, ID_FIELD, SYNC_FIELD};
use crate::error::{Result, SyncError};

/// Where a write goes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// One document by id
    Document { index: String, id: String },
    /// Every live document in `index` whose `field` equals `value`
    FanOut {
        index: String,
        field: String,
        value: String,
    },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Document { index, id } => write!(f, "{}/{}", index, id),
            Target::FanOut {
                index,
                field,
                value,
            } => write!(f, "{}[{}={}]", index, field, value),
        }
    }
}

/// Document holding a parent snapshot to embed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRef {
    pub entity_type: String,
    pub index: String,
    pub id: String,
}

/// Update rule applied to each target document
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Create or replace the entity's own attributes
    UpsertRoot {
        attributes: Attributes,
        has_many: Vec<String>,
        belongs_to: Vec<SlotBinding>,
    },
    /// Remove the entity's own document
    RemoveRoot,
    /// Add or refresh this entity in a parent's `hasMany` list
    UpsertEntry {
        property: String,
        entry_id: String,
        entry: Attributes,
    },
    /// Drop this entity from a parent's `hasMany` list
    RemoveEntry { property: String, entry_id: String },
    /// Embed this entity as the parent snapshot of a child
    EmbedParent {
        property: String,
        foreign_key: String,
        parent_id: String,
        snapshot: Attributes,
        /// Only refresh slots already holding this parent
        refresh_only: bool,
    },
    /// Embed the stored document of `parent` into this entity's slot
    EmbedParentFrom {
        property: String,
        foreign_key: String,
        parent: DocRef,
    },
    /// Drop this entity's snapshot from a child's slot
    StripParent { property: String, parent_id: String },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::UpsertRoot { .. } => "upsert_root",
            Operation::RemoveRoot => "remove_root",
            Operation::UpsertEntry { .. } => "upsert_entry",
            Operation::RemoveEntry { .. } => "remove_entry",
            Operation::EmbedParent { refresh_only: true, .. } => "refresh_parent",
            Operation::EmbedParent { .. } => "embed_parent",
            Operation::EmbedParentFrom { .. } => "embed_parent_from",
            Operation::StripParent { .. } => "strip_parent",
        }
    }

    /// Takes this entity out of another document
    pub fn is_removal(&self) -> bool {
        matches!(self, Operation::RemoveEntry { .. } | Operation::StripParent { .. })
    }
}

/// One planned write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteTask {
    pub target: Target,
    pub operation: Operation,
    /// Marker of the originating change
    pub marker: SyncMarker,
}

impl WriteTask {
    fn document(index: &str, id: &str, operation: Operation, marker: &SyncMarker) -> Self {
        Self {
            target: Target::Document {
                index: index.to_string(),
                id: id.to_string(),
            },
            operation,
            marker: marker.clone(),
        }
    }

    fn fan_out(index: &str, field: &str, value: &str, operation: Operation, marker: &SyncMarker) -> Self {
        Self {
            target: Target::FanOut {
                index: index.to_string(),
                field: field.to_string(),
                value: value.to_string(),
            },
            operation,
            marker: marker.clone(),
        }
    }
}

impl fmt::Display for WriteTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation.name(), self.target)
    }
}

/// Primary write plus the cascade it triggers
#[derive(Debug, Clone, PartialEq)]
pub struct CascadePlan {
    pub primary: WriteTask,
    pub cascade: Vec<WriteTask>,
}

impl CascadePlan {
    pub fn len(&self) -> usize {
        1 + self.cascade.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Cascade tasks to run given how the primary write went.
    ///
    /// A stale primary still runs its removals: a newer change to the same
    /// entity re-parents from its own old image, so the parent this change
    /// left behind is only ever stripped here.
    pub fn cascade_after(&self, primary: WriteOutcome) -> Vec<&WriteTask> {
        match primary {
            WriteOutcome::Stale => self.cascade.iter().filter(|task| task.operation.is_removal()).collect(),
            _ => self.cascade.iter().collect(),
        }
    }
}

/// A child type embedding a parent under `property`, linked by `foreign_key`
struct ChildLink<'a> {
    child: &'a EntityConfig,
    property: &'a str,
    foreign_key: &'a str,
}

pub struct CascadePlanner {
    catalog: Arc<RelationshipCatalog>,
}

impl CascadePlanner {
    pub fn new(catalog: Arc<RelationshipCatalog>) -> Self {
        Self { catalog }
    }

    pub fn plan(&self, event: &ChangeEvent) -> Result<CascadePlan> {
        let config = self.catalog.by_entity_type(&event.entity_type).ok_or_else(|| {
            SyncError::catalog(format!("Entity type '{}' is not in the catalog", event.entity_type))
        })?;

        match event.kind {
            EventKind::Upsert => self.plan_upsert(config, event),
            EventKind::Remove => Ok(self.plan_remove(config, event)),
        }
    }

    fn plan_remove(&self, config: &EntityConfig, event: &ChangeEvent) -> CascadePlan {
        let marker = &event.marker;
        let id = event.entity_id.as_str();
        let primary = WriteTask::document(&config.index_name, id, Operation::RemoveRoot, marker);
        let mut cascade = Vec::new();

        // Children embedding this entity as their parent
        for (link, _) in self.child_links(config) {
            cascade.push(WriteTask::fan_out(
                &link.child.index_name,
                link.foreign_key,
                id,
                Operation::StripParent {
                    property: link.property.to_string(),
                    parent_id: id.to_string(),
                },
                marker,
            ));
        }

        // Parents listing this entity
        let prior = event.old_attributes.as_ref();
        for (parent, relationship) in self.catalog.parents_of(&config.entity_type) {
            let Some(parent_id) = prior.and_then(|attrs| key_at(attrs, &relationship.foreign_key)) else {
                continue;
            };
            cascade.push(WriteTask::document(
                &parent.index_name,
                &parent_id,
                Operation::RemoveEntry {
                    property: relationship.property.clone(),
                    entry_id: id.to_string(),
                },
                marker,
            ));
        }

        CascadePlan { primary, cascade }
    }

    fn plan_upsert(&self, config: &EntityConfig, event: &ChangeEvent) -> Result<CascadePlan> {
        let marker = &event.marker;
        let id = event.entity_id.as_str();
        let image = event.new_attributes.as_ref().ok_or_else(|| {
            SyncError::serialization(format!("Upsert of {}#{} has no new image", config.entity_type, id))
        })?;
        let prior = event.old_attributes.as_ref();
        let snapshot = self.snapshot(config, id, image);

        let primary = WriteTask::document(
            &config.index_name,
            id,
            Operation::UpsertRoot {
                attributes: snapshot.clone(),
                has_many: config.has_many.iter().map(|r| r.property.clone()).collect(),
                belongs_to: config
                    .belongs_to
                    .iter()
                    .map(|r| SlotBinding {
                        property: r.property.clone(),
                        foreign_key: r.foreign_key.clone(),
                    })
                    .collect(),
            },
            marker,
        );
        let mut cascade = Vec::new();

        // Children embedding this entity: set where declared by the child,
        // refresh-only where discovered through this entity's hasMany
        for (link, refresh_only) in self.child_links(config) {
            cascade.push(WriteTask::fan_out(
                &link.child.index_name,
                link.foreign_key,
                id,
                Operation::EmbedParent {
                    property: link.property.to_string(),
                    foreign_key: link.foreign_key.to_string(),
                    parent_id: id.to_string(),
                    snapshot: snapshot.clone(),
                    refresh_only,
                },
                marker,
            ));
        }

        // Parents listing this entity, plus the former parent on re-parenting
        for (parent, relationship) in self.catalog.parents_of(&config.entity_type) {
            let parent_id = key_at(image, &relationship.foreign_key);
            let former_id = prior.and_then(|attrs| key_at(attrs, &relationship.foreign_key));

            if let Some(parent_id) = &parent_id {
                cascade.push(WriteTask::document(
                    &parent.index_name,
                    parent_id,
                    Operation::UpsertEntry {
                        property: relationship.property.clone(),
                        entry_id: id.to_string(),
                        entry: snapshot.clone(),
                    },
                    marker,
                ));
            }
            if let Some(former_id) = former_id.filter(|f| Some(f) != parent_id.as_ref()) {
                cascade.push(WriteTask::document(
                    &parent.index_name,
                    &former_id,
                    Operation::RemoveEntry {
                        property: relationship.property.clone(),
                        entry_id: id.to_string(),
                    },
                    marker,
                ));
            }
        }

        // Parent snapshots embedded in this entity's own document
        for relationship in &config.belongs_to {
            let Some(parent_id) = key_at(image, &relationship.foreign_key) else {
                continue;
            };
            let Some(parent) = self.catalog.by_entity_type(&relationship.target_entity_type) else {
                continue;
            };
            cascade.push(WriteTask::document(
                &config.index_name,
                id,
                Operation::EmbedParentFrom {
                    property: relationship.property.clone(),
                    foreign_key: relationship.foreign_key.clone(),
                    parent: DocRef {
                        entity_type: parent.entity_type.clone(),
                        index: parent.index_name.clone(),
                        id: parent_id,
                    },
                },
                marker,
            ));
        }

        Ok(CascadePlan { primary, cascade })
    }

    /// Image without embedded relationship data, so embedding stays one level deep
    fn snapshot(&self, config: &EntityConfig, id: &str, image: &Attributes) -> Attributes {
        let nested: HashSet<&str> = config.relationship_properties().collect();
        let mut snapshot: Attributes = image
            .iter()
            .filter(|(name, _)| !nested.contains(name.as_str()) && name.as_str() != SYNC_FIELD)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        snapshot.insert(ID_FIELD.to_string(), id.into());
        snapshot
    }

    /// Children embedding `config` as their parent.
    ///
    /// Children whose `belongsTo` targets `config` come first; those reached
    /// only through this entity's own `hasMany` follow, flagged refresh-only.
    fn child_links(&self, config: &EntityConfig) -> Vec<(ChildLink<'_>, bool)> {
        let declared = self
            .catalog
            .children_belonging_to(&config.entity_type)
            .into_iter()
            .map(|(child, relationship)| {
                let link = ChildLink {
                    child,
                    property: &relationship.property,
                    foreign_key: &relationship.foreign_key,
                };
                (link, false)
            });
        let mirrored = self.has_many_links(config).into_iter().map(|link| (link, true));

        let mut seen = HashSet::new();
        declared
            .chain(mirrored)
            .filter(|(link, _)| {
                seen.insert((link.child.entity_type.as_str(), link.foreign_key, link.property))
            })
            .collect()
    }

    /// Children reached through this entity's `hasMany`, with the property
    /// of the mirroring `belongsTo`
    fn has_many_links(&self, config: &EntityConfig) -> Vec<ChildLink<'_>> {
        let mut links = Vec::new();
        for relationship in &config.has_many {
            let Some(child) = self.catalog.by_entity_type(&relationship.target_entity_type) else {
                continue;
            };
            match self.catalog.inverse_belongs_to(
                &child.entity_type,
                &config.entity_type,
                &relationship.foreign_key,
            ) {
                Some(inverse) => links.push(ChildLink {
                    child,
                    property: &inverse.property,
                    foreign_key: &inverse.foreign_key,
                }),
                None => debug!(
                    parent = %config.entity_type,
                    child = %child.entity_type,
                    "No belongsTo mirrors hasMany '{}'; children embed nothing to refresh",
                    relationship.property
                ),
            }
        }
        links
    }
}
