//! Relationship catalog
//!
//! Entity types and their `hasMany`/`belongsTo` relationships, validated
//! once at startup and held as a directed graph: one node per entity type,
//! one edge per declared relationship pointing from the declaring entity to
//! its target. Inverse lookups walk incoming edges, so relationships only
//! need to be declared on one side.

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::domain::{ID_FIELD, SYNC_FIELD};
use crate::error::{Result, SyncError};

/// Relationship declared on an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Relationship {
    /// Name under which related data is embedded in the owning document
    pub property: String,
    /// Attribute on the child side referencing the parent's id
    pub foreign_key: String,
    pub target_entity_type: String,
}

impl Relationship {
    pub fn new(
        property: impl Into<String>,
        foreign_key: impl Into<String>,
        target_entity_type: impl Into<String>,
    ) -> Self {
        Self {
            property: property.into(),
            foreign_key: foreign_key.into(),
            target_entity_type: target_entity_type.into(),
        }
    }
}

/// Catalog entry for one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EntityConfig {
    pub entity_type: String,
    pub index_name: String,
    #[serde(default)]
    pub has_many: Vec<Relationship>,
    #[serde(default)]
    pub belongs_to: Vec<Relationship>,
}

impl EntityConfig {
    pub fn new(entity_type: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            index_name: index_name.into(),
            has_many: Vec::new(),
            belongs_to: Vec::new(),
        }
    }

    pub fn has_many(mut self, relationship: Relationship) -> Self {
        self.has_many.push(relationship);
        self
    }

    pub fn belongs_to(mut self, relationship: Relationship) -> Self {
        self.belongs_to.push(relationship);
        self
    }

    /// Every property under which this type embeds related data
    pub fn relationship_properties(&self) -> impl Iterator<Item = &str> {
        self.has_many
            .iter()
            .chain(self.belongs_to.iter())
            .map(|r| r.property.as_str())
    }
}

/// Direction of a relationship edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    HasMany,
    BelongsTo,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationKind::HasMany => f.write_str("hasMany"),
            RelationKind::BelongsTo => f.write_str("belongsTo"),
        }
    }
}

#[derive(Debug, Clone)]
struct RelationEdge {
    kind: RelationKind,
    /// Position in the declaring entity's relationship list
    position: usize,
}

/// Validated, immutable relationship graph
#[derive(Debug, Clone)]
pub struct RelationshipCatalog {
    graph: DiGraph<EntityConfig, RelationEdge>,
    nodes: HashMap<String, NodeIndex>,
}

impl RelationshipCatalog {
    /// Build the catalog, failing fast on any inconsistency
    pub fn new(configs: Vec<EntityConfig>) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::with_capacity(configs.len());

        for config in configs {
            validate_entity(&config)?;
            if nodes.contains_key(&config.entity_type) {
                return Err(SyncError::catalog(format!(
                    "Entity type '{}' is declared more than once",
                    config.entity_type
                )));
            }
            let entity_type = config.entity_type.clone();
            let node = graph.add_node(config);
            nodes.insert(entity_type, node);
        }

        let mut edges = Vec::new();
        for node in graph.node_indices() {
            let config = &graph[node];
            let declared = config
                .has_many
                .iter()
                .enumerate()
                .map(|(i, r)| (RelationKind::HasMany, i, r))
                .chain(
                    config
                        .belongs_to
                        .iter()
                        .enumerate()
                        .map(|(i, r)| (RelationKind::BelongsTo, i, r)),
                );

            for (kind, position, relationship) in declared {
                let target = nodes.get(&relationship.target_entity_type).ok_or_else(|| {
                    SyncError::catalog(format!(
                        "{} relationship '{}' on '{}' targets undeclared entity type '{}'",
                        kind,
                        relationship.property,
                        config.entity_type,
                        relationship.target_entity_type
                    ))
                })?;
                edges.push((node, *target, RelationEdge { kind, position }));
            }
        }
        for (from, to, edge) in edges {
            graph.add_edge(from, to, edge);
        }

        Ok(Self { graph, nodes })
    }

    pub fn by_entity_type(&self, entity_type: &str) -> Option<&EntityConfig> {
        self.nodes.get(entity_type).map(|node| &self.graph[*node])
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.nodes.contains_key(entity_type)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Entity configs in declaration order
    pub fn entities(&self) -> impl Iterator<Item = &EntityConfig> {
        self.graph.node_weights()
    }

    /// Entries whose `hasMany` targets `entity_type`
    pub fn parents_of(&self, entity_type: &str) -> Vec<(&EntityConfig, &Relationship)> {
        self.incoming(entity_type, RelationKind::HasMany)
    }

    /// Entries whose `belongsTo` targets `entity_type`
    pub fn children_belonging_to(&self, entity_type: &str) -> Vec<(&EntityConfig, &Relationship)> {
        self.incoming(entity_type, RelationKind::BelongsTo)
    }

    /// Properties under which `entity_type` embeds related data
    pub fn relationship_properties(&self, entity_type: &str) -> HashSet<&str> {
        self.by_entity_type(entity_type)
            .map(|config| config.relationship_properties().collect())
            .unwrap_or_default()
    }

    /// The `belongsTo` on `child_type` mirroring a parent's `hasMany`
    pub fn inverse_belongs_to(
        &self,
        child_type: &str,
        parent_type: &str,
        foreign_key: &str,
    ) -> Option<&Relationship> {
        self.by_entity_type(child_type)?
            .belongs_to
            .iter()
            .find(|r| r.target_entity_type == parent_type && r.foreign_key == foreign_key)
    }

    fn incoming(&self, entity_type: &str, kind: RelationKind) -> Vec<(&EntityConfig, &Relationship)> {
        let Some(node) = self.nodes.get(entity_type) else {
            return Vec::new();
        };

        let mut found: Vec<_> = self
            .graph
            .edges_directed(*node, Direction::Incoming)
            .filter(|edge| edge.weight().kind == kind)
            .map(|edge| (edge.source(), edge.weight().position))
            .collect();
        // petgraph yields incoming edges newest-first
        found.sort_unstable();

        found
            .into_iter()
            .map(|(source, position)| {
                let config = &self.graph[source];
                let relationship = match kind {
                    RelationKind::HasMany => &config.has_many[position],
                    RelationKind::BelongsTo => &config.belongs_to[position],
                };
                (config, relationship)
            })
            .collect()
    }
}

fn validate_entity(config: &EntityConfig) -> Result<()> {
    if config.entity_type.trim().is_empty() {
        return Err(SyncError::catalog("Entity type must not be empty"));
    }
    if config.index_name.trim().is_empty() {
        return Err(SyncError::catalog(format!(
            "Entity type '{}' has an empty index name",
            config.entity_type
        )));
    }

    let mut properties = HashSet::new();
    for relationship in config.has_many.iter().chain(config.belongs_to.iter()) {
        if relationship.property.is_empty() || relationship.foreign_key.is_empty() {
            return Err(SyncError::catalog(format!(
                "Relationship on '{}' targeting '{}' needs both property and foreignKey",
                config.entity_type, relationship.target_entity_type
            )));
        }
        if relationship.property == ID_FIELD || relationship.property == SYNC_FIELD {
            return Err(SyncError::catalog(format!(
                "Relationship property '{}' on '{}' collides with a reserved field",
                relationship.property, config.entity_type
            )));
        }
        if !properties.insert(relationship.property.as_str()) {
            return Err(SyncError::catalog(format!(
                "Property '{}' is used by more than one relationship on '{}'",
                relationship.property, config.entity_type
            )));
        }
    }
    Ok(())
}
