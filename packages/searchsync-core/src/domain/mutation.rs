//! Declarative conditional mutations
//!
//! A `Mutation` describes one conditional write to one document. Stores
//! apply it atomically: the in-memory store runs [`Mutation::interpret`]
//! under its per-key lock, the OpenSearch store ships the mutation as
//! parameters of a Painless script implementing the same rules.
//!
//! | Mutation      | Target            | Guarded by          |
//! |---------------|-------------------|---------------------|
//! | `ReplaceRoot` | whole document    | root `_sync`        |
//! | `RemoveRoot`  | whole document    | root `_sync`        |
//! | `UpsertEntry` | `hasMany` list    | entry `_sync`       |
//! | `RemoveEntry` | `hasMany` list    | entry `_sync`       |
//! | `SetSlot`     | `belongsTo` slot  | slot `_sync` + fk   |
//! | `ClearSlot`   | `belongsTo` slot  | slot `_sync`        |
//!
//! Strips leave a removal record under `_removed.<property>.<id>`, even when
//! there was nothing embedded to strip. An `UpsertEntry` or `SetSlot` older
//! than that record is stale, so a strip and an older embed of the same
//! entity converge whichever lands first. A newer embed drops the record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    is_tombstone, key_at, Attributes, OrderingToken, SyncMarker, WriteOutcome, ID_FIELD, REMOVED_FIELD,
    SYNC_FIELD,
};
use crate::conflict::{should_apply, should_apply_to};

/// A `belongsTo` slot kept across root replacement while its parent still
/// matches the foreign key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotBinding {
    pub property: String,
    pub foreign_key: String,
}

/// Conditional write to one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Mutation {
    /// Create or replace the entity's own attributes, keeping embedded data
    ReplaceRoot {
        id: String,
        attributes: Attributes,
        marker: SyncMarker,
        /// `hasMany` properties preserved from the stored document
        has_many: Vec<String>,
        /// `belongsTo` slots preserved while the parent still matches
        belongs_to: Vec<SlotBinding>,
    },
    /// Delete the document, or replace it with a tombstone
    RemoveRoot {
        id: String,
        marker: SyncMarker,
        tombstone: bool,
    },
    /// Add or replace one child entry in a `hasMany` list
    UpsertEntry {
        property: String,
        entry_id: String,
        /// Entry payload including `id` and `_sync`
        entry: Attributes,
        marker: SyncMarker,
    },
    /// Remove one child entry from a `hasMany` list
    RemoveEntry {
        property: String,
        entry_id: String,
        marker: SyncMarker,
    },
    /// Embed a parent snapshot in a `belongsTo` slot
    SetSlot {
        property: String,
        foreign_key: String,
        parent_id: String,
        /// Snapshot payload including `id` and `_sync`
        snapshot: Attributes,
        marker: SyncMarker,
        /// Only refresh a slot that already holds this parent
        only_if_present: bool,
    },
    /// Drop a parent snapshot from a `belongsTo` slot
    ClearSlot {
        property: String,
        parent_id: String,
        marker: SyncMarker,
    },
}

/// What a store must do after interpreting a mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Store this document (outcome `Applied`)
    Put(Attributes),
    /// Delete the document (outcome `Applied`)
    Delete,
    /// Leave the document untouched
    Keep(WriteOutcome),
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::ReplaceRoot { .. } => "replaceRoot",
            Mutation::RemoveRoot { .. } => "removeRoot",
            Mutation::UpsertEntry { .. } => "upsertEntry",
            Mutation::RemoveEntry { .. } => "removeEntry",
            Mutation::SetSlot { .. } => "setSlot",
            Mutation::ClearSlot { .. } => "clearSlot",
        }
    }

    pub fn marker(&self) -> &SyncMarker {
        match self {
            Mutation::ReplaceRoot { marker, .. }
            | Mutation::RemoveRoot { marker, .. }
            | Mutation::UpsertEntry { marker, .. }
            | Mutation::RemoveEntry { marker, .. }
            | Mutation::SetSlot { marker, .. }
            | Mutation::ClearSlot { marker, .. } => marker,
        }
    }

    /// Whether the mutation may create a document that does not exist
    pub fn creates_documents(&self) -> bool {
        match self {
            Mutation::ReplaceRoot { .. } => true,
            Mutation::RemoveRoot { tombstone, .. } => *tombstone,
            _ => false,
        }
    }

    /// Apply the conditional rules to the stored document.
    ///
    /// Pure: the caller supplies the current state and commits the
    /// returned transition within the same critical section.
    pub fn interpret(&self, current: Option<&Attributes>) -> Transition {
        let token = &self.marker().ordering_token;

        match self {
            Mutation::ReplaceRoot {
                id,
                attributes,
                marker,
                has_many,
                belongs_to,
            } => {
                let Some(doc) = current else {
                    return Transition::Put(root_document(id, attributes, marker));
                };
                if !should_apply_to(doc, token) {
                    return Transition::Keep(WriteOutcome::Stale);
                }

                let mut next = root_document(id, attributes, marker);
                if let Some(removed) = doc.get(REMOVED_FIELD) {
                    next.insert(REMOVED_FIELD.into(), removed.clone());
                }
                for property in has_many {
                    if let Some(list) = doc.get(property) {
                        next.insert(property.clone(), list.clone());
                    }
                }
                for slot in belongs_to {
                    let Some(Value::Object(embedded)) = doc.get(&slot.property) else {
                        continue;
                    };
                    let still_parent = key_at(attributes, &slot.foreign_key)
                        .is_some_and(|fk| key_at(embedded, ID_FIELD).as_deref() == Some(fk.as_str()));
                    if still_parent {
                        next.insert(slot.property.clone(), Value::Object(embedded.clone()));
                    }
                }
                Transition::Put(next)
            }

            Mutation::RemoveRoot {
                id,
                marker,
                tombstone,
            } => {
                if let Some(doc) = current {
                    if !should_apply_to(doc, token) {
                        return Transition::Keep(WriteOutcome::Stale);
                    }
                } else if !tombstone {
                    return Transition::Keep(WriteOutcome::NotFound);
                }

                if *tombstone {
                    let mut stub = Attributes::new();
                    stub.insert(ID_FIELD.into(), Value::String(id.clone()));
                    stub.insert(SYNC_FIELD.into(), marker.to_value());
                    // A resurrected document still refuses embeds older than its strips
                    if let Some(removed) = current.and_then(|doc| doc.get(REMOVED_FIELD)) {
                        stub.insert(REMOVED_FIELD.into(), removed.clone());
                    }
                    Transition::Put(stub)
                } else {
                    Transition::Delete
                }
            }

            Mutation::UpsertEntry {
                property,
                entry_id,
                entry,
                ..
            } => {
                let Some(doc) = live(current) else {
                    return Transition::Keep(WriteOutcome::NotFound);
                };
                if removed_after(doc, property, entry_id, token) {
                    return Transition::Keep(WriteOutcome::Stale);
                }
                let mut entries = list_at(doc, property);

                match position_of(&entries, entry_id) {
                    Some(pos) => {
                        let existing = entries[pos].as_object().and_then(SyncMarker::read);
                        if !should_apply(existing.as_ref(), token) {
                            return Transition::Keep(WriteOutcome::Stale);
                        }
                        entries[pos] = Value::Object(entry.clone());
                    }
                    None => entries.push(Value::Object(entry.clone())),
                }

                let mut next = doc.clone();
                next.insert(property.clone(), Value::Array(entries));
                forget_removal(&mut next, property, entry_id);
                Transition::Put(next)
            }

            Mutation::RemoveEntry {
                property,
                entry_id,
                marker,
            } => {
                let Some(doc) = live(current) else {
                    return Transition::Keep(WriteOutcome::NotFound);
                };
                if removed_after(doc, property, entry_id, token) {
                    return Transition::Keep(WriteOutcome::Stale);
                }

                let mut next = doc.clone();
                let mut entries = list_at(doc, property);
                if let Some(pos) = position_of(&entries, entry_id) {
                    let existing = entries[pos].as_object().and_then(SyncMarker::read);
                    if !should_apply(existing.as_ref(), token) {
                        return Transition::Keep(WriteOutcome::Stale);
                    }
                    entries.remove(pos);
                    next.insert(property.clone(), Value::Array(entries));
                }
                record_removal(&mut next, property, entry_id, marker);
                changed(doc, next)
            }

            Mutation::SetSlot {
                property,
                foreign_key,
                parent_id,
                snapshot,
                only_if_present,
                ..
            } => {
                let Some(doc) = live(current) else {
                    return Transition::Keep(WriteOutcome::NotFound);
                };
                // The child's own foreign key decides which parent owns the slot
                if key_at(doc, foreign_key).as_deref() != Some(parent_id.as_str()) {
                    return Transition::Keep(WriteOutcome::Noop);
                }
                if removed_after(doc, property, parent_id, token) {
                    return Transition::Keep(WriteOutcome::Stale);
                }

                match doc.get(property) {
                    Some(Value::Object(slot)) if key_at(slot, ID_FIELD).as_deref() == Some(parent_id.as_str()) => {
                        if !should_apply_to(slot, token) {
                            return Transition::Keep(WriteOutcome::Stale);
                        }
                    }
                    _ if *only_if_present => return Transition::Keep(WriteOutcome::Noop),
                    _ => {}
                }

                let mut next = doc.clone();
                next.insert(property.clone(), Value::Object(snapshot.clone()));
                forget_removal(&mut next, property, parent_id);
                Transition::Put(next)
            }

            Mutation::ClearSlot {
                property,
                parent_id,
                marker,
            } => {
                let Some(doc) = live(current) else {
                    return Transition::Keep(WriteOutcome::NotFound);
                };
                if removed_after(doc, property, parent_id, token) {
                    return Transition::Keep(WriteOutcome::Stale);
                }

                let mut next = doc.clone();
                if let Some(Value::Object(slot)) = doc.get(property) {
                    if key_at(slot, ID_FIELD).as_deref() == Some(parent_id.as_str()) {
                        if !should_apply_to(slot, token) {
                            return Transition::Keep(WriteOutcome::Stale);
                        }
                        next.remove(property);
                    }
                }
                record_removal(&mut next, property, parent_id, marker);
                changed(doc, next)
            }
        }
    }
}

fn root_document(id: &str, attributes: &Attributes, marker: &SyncMarker) -> Attributes {
    let mut doc = attributes.clone();
    doc.insert(ID_FIELD.into(), Value::String(id.to_string()));
    doc.insert(SYNC_FIELD.into(), marker.to_value());
    doc
}

/// Marker of the strip recorded for `property`/`id`, if any
pub fn removal_of(doc: &Attributes, property: &str, id: &str) -> Option<SyncMarker> {
    let recorded = doc.get(REMOVED_FIELD)?.get(property)?.get(id)?;
    serde_json::from_value(recorded.clone()).ok()
}

/// Whether a strip newer than `token` was recorded for `property`/`id`
fn removed_after(doc: &Attributes, property: &str, id: &str, token: &OrderingToken) -> bool {
    removal_of(doc, property, id).is_some_and(|removal| !should_apply(Some(&removal), token))
}

fn record_removal(doc: &mut Attributes, property: &str, id: &str, marker: &SyncMarker) {
    let removed = doc
        .entry(REMOVED_FIELD)
        .or_insert_with(|| Value::Object(Attributes::new()));
    if !removed.is_object() {
        *removed = Value::Object(Attributes::new());
    }
    let Some(removed) = removed.as_object_mut() else {
        return;
    };

    let ids = removed
        .entry(property)
        .or_insert_with(|| Value::Object(Attributes::new()));
    if !ids.is_object() {
        *ids = Value::Object(Attributes::new());
    }
    if let Some(ids) = ids.as_object_mut() {
        ids.insert(id.to_string(), marker.to_value());
    }
}

fn forget_removal(doc: &mut Attributes, property: &str, id: &str) {
    let Some(Value::Object(removed)) = doc.get_mut(REMOVED_FIELD) else {
        return;
    };
    if let Some(Value::Object(ids)) = removed.get_mut(property) {
        ids.remove(id);
        if ids.is_empty() {
            removed.remove(property);
        }
    }
    let drained = removed.is_empty();
    if drained {
        doc.remove(REMOVED_FIELD);
    }
}

/// `Put` unless the write would leave the document as it was
fn changed(doc: &Attributes, next: Attributes) -> Transition {
    if next == *doc {
        Transition::Keep(WriteOutcome::Noop)
    } else {
        Transition::Put(next)
    }
}

fn live(current: Option<&Attributes>) -> Option<&Attributes> {
    current.filter(|doc| !is_tombstone(doc))
}

fn list_at(doc: &Attributes, property: &str) -> Vec<Value> {
    match doc.get(property) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn position_of(entries: &[Value], entry_id: &str) -> Option<usize> {
    entries.iter().position(|entry| {
        entry
            .as_object()
            .and_then(|e| key_at(e, ID_FIELD))
            .as_deref()
            == Some(entry_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn marker(token: &str) -> SyncMarker {
        SyncMarker::new(token, format!("evt-{}", token), EventKind::Upsert, "arn")
    }

    fn obj(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn put(transition: Transition) -> Attributes {
        match transition {
            Transition::Put(doc) => doc,
            other => panic!("expected Put, got {:?}", other),
        }
    }

    fn replace_root(token: &str, attributes: Value) -> Mutation {
        Mutation::ReplaceRoot {
            id: "1".into(),
            attributes: obj(attributes),
            marker: marker(token),
            has_many: vec!["releases".into()],
            belongs_to: vec![SlotBinding {
                property: "launch".into(),
                foreign_key: "launchId".into(),
            }],
        }
    }

    #[test]
    fn test_replace_root_creates_document() {
        let doc = put(replace_root("10", json!({"name": "Apollo"})).interpret(None));

        assert_eq!(doc["id"], json!("1"));
        assert_eq!(doc["name"], json!("Apollo"));
        assert_eq!(doc["_sync"]["orderingToken"], json!("10"));
    }

    #[test]
    fn test_replace_root_rejects_older_token() {
        let current = put(replace_root("20", json!({"name": "new"})).interpret(None));
        let transition = replace_root("15", json!({"name": "old"})).interpret(Some(&current));

        assert_eq!(transition, Transition::Keep(WriteOutcome::Stale));
    }

    #[test]
    fn test_replace_root_preserves_embedded_relations() {
        let current = obj(json!({
            "id": "1",
            "name": "old",
            "launchId": "7",
            "releases": [{"id": "9", "_sync": marker("11").to_value()}],
            "launch": {"id": "7", "_sync": marker("3").to_value()},
            "_sync": marker("10").to_value()
        }));

        let doc = put(
            replace_root("12", json!({"name": "new", "launchId": "7"})).interpret(Some(&current)),
        );

        assert_eq!(doc["name"], json!("new"));
        assert_eq!(doc["releases"], current["releases"]);
        assert_eq!(doc["launch"], current["launch"]);
    }

    #[test]
    fn test_replace_root_drops_slot_of_former_parent() {
        let current = obj(json!({
            "id": "1",
            "launchId": "7",
            "launch": {"id": "7"},
            "_sync": marker("10").to_value()
        }));

        let doc = put(replace_root("12", json!({"launchId": "8"})).interpret(Some(&current)));
        assert!(!doc.contains_key("launch"));
    }

    #[test]
    fn test_remove_root_tombstone_and_delete() {
        let current = put(replace_root("10", json!({"name": "x"})).interpret(None));

        let tombstone = Mutation::RemoveRoot {
            id: "1".into(),
            marker: marker("11").with_kind(EventKind::Remove),
            tombstone: true,
        };
        let stub = put(tombstone.interpret(Some(&current)));
        assert_eq!(stub.len(), 2);
        assert!(is_tombstone(&stub));

        let delete = Mutation::RemoveRoot {
            id: "1".into(),
            marker: marker("11").with_kind(EventKind::Remove),
            tombstone: false,
        };
        assert_eq!(delete.interpret(Some(&current)), Transition::Delete);
        assert_eq!(
            delete.interpret(None),
            Transition::Keep(WriteOutcome::NotFound)
        );
    }

    #[test]
    fn test_tombstone_keeps_removal_records() {
        let mut current = put(replace_root("10", json!({"name": "x"})).interpret(None));
        current.insert(
            REMOVED_FIELD.into(),
            json!({"releases": {"9": marker("11").with_kind(EventKind::Remove).to_value()}}),
        );

        let remove = Mutation::RemoveRoot {
            id: "1".into(),
            marker: marker("12").with_kind(EventKind::Remove),
            tombstone: true,
        };
        let stub = put(remove.interpret(Some(&current)));
        assert!(is_tombstone(&stub));
        assert_eq!(stub.get(REMOVED_FIELD), current.get(REMOVED_FIELD));

        let resurrected = put(replace_root("13", json!({"name": "y"})).interpret(Some(&stub)));
        assert_eq!(resurrected.get(REMOVED_FIELD), current.get(REMOVED_FIELD));
    }

    #[test]
    fn test_remove_root_before_upsert_leaves_tombstone() {
        let remove = Mutation::RemoveRoot {
            id: "1".into(),
            marker: marker("30").with_kind(EventKind::Remove),
            tombstone: true,
        };
        let stub = put(remove.interpret(None));

        let late = replace_root("25", json!({"name": "late"})).interpret(Some(&stub));
        assert_eq!(late, Transition::Keep(WriteOutcome::Stale));
    }

    #[test]
    fn test_upsert_entry_adds_once_and_replaces_newer() {
        let parent = obj(json!({"id": "1", "_sync": marker("10").to_value()}));
        let entry = |token: &str, name: &str| Mutation::UpsertEntry {
            property: "releases".into(),
            entry_id: "9".into(),
            entry: obj(json!({"id": "9", "name": name, "_sync": marker(token).to_value()})),
            marker: marker(token),
        };

        let once = put(entry("11", "a").interpret(Some(&parent)));
        let twice = put(entry("11", "a").interpret(Some(&once)));
        assert_eq!(once, twice);
        assert_eq!(twice["releases"].as_array().unwrap().len(), 1);

        let newer = put(entry("12", "b").interpret(Some(&twice)));
        assert_eq!(newer["releases"][0]["name"], json!("b"));

        assert_eq!(
            entry("11", "a").interpret(Some(&newer)),
            Transition::Keep(WriteOutcome::Stale)
        );
    }

    #[test]
    fn test_entry_mutations_skip_missing_parent() {
        let remove = Mutation::RemoveEntry {
            property: "releases".into(),
            entry_id: "9".into(),
            marker: marker("12"),
        };
        assert_eq!(remove.interpret(None), Transition::Keep(WriteOutcome::NotFound));

        let parent = obj(json!({"id": "1", "releases": []}));
        let stripped = put(remove.interpret(Some(&parent)));
        assert_eq!(stripped["releases"], json!([]));
        assert_eq!(removal_of(&stripped, "releases", "9"), Some(marker("12")));

        // Redelivery changes nothing
        assert_eq!(
            remove.interpret(Some(&stripped)),
            Transition::Keep(WriteOutcome::Noop)
        );
    }

    #[test]
    fn test_remove_entry_before_older_upsert_entry() {
        let parent = obj(json!({"id": "1", "_sync": marker("10").to_value()}));
        let upsert = |token: &str| Mutation::UpsertEntry {
            property: "releases".into(),
            entry_id: "9".into(),
            entry: obj(json!({"id": "9", "_sync": marker(token).to_value()})),
            marker: marker(token),
        };
        let remove = Mutation::RemoveEntry {
            property: "releases".into(),
            entry_id: "9".into(),
            marker: marker("12").with_kind(EventKind::Remove),
        };

        // The strip lands first and finds nothing; the older entry must not return
        let stripped = put(remove.interpret(Some(&parent)));
        assert_eq!(
            upsert("11").interpret(Some(&stripped)),
            Transition::Keep(WriteOutcome::Stale)
        );

        // A newer entry wins and clears the removal record
        let resurrected = put(upsert("13").interpret(Some(&stripped)));
        assert_eq!(resurrected["releases"][0]["id"], json!("9"));
        assert!(!resurrected.contains_key(REMOVED_FIELD));
    }

    #[test]
    fn test_strip_and_older_embed_converge_in_either_order() {
        let parent = obj(json!({"id": "1", "_sync": marker("10").to_value()}));
        let upsert = Mutation::UpsertEntry {
            property: "releases".into(),
            entry_id: "9".into(),
            entry: obj(json!({"id": "9", "_sync": marker("11").to_value()})),
            marker: marker("11"),
        };
        let remove = Mutation::RemoveEntry {
            property: "releases".into(),
            entry_id: "9".into(),
            marker: marker("12").with_kind(EventKind::Remove),
        };
        let apply = |doc: Attributes, mutation: &Mutation| match mutation.interpret(Some(&doc)) {
            Transition::Put(next) => next,
            _ => doc,
        };

        let upsert_first = apply(apply(parent.clone(), &upsert), &remove);
        let remove_first = apply(apply(parent, &remove), &upsert);

        for doc in [&upsert_first, &remove_first] {
            let entries = doc.get("releases").and_then(Value::as_array);
            assert!(entries.map_or(true, |e| e.is_empty()));
            assert_eq!(
                removal_of(doc, "releases", "9"),
                Some(marker("12").with_kind(EventKind::Remove))
            );
        }
    }

    #[test]
    fn test_remove_entry_honours_entry_marker() {
        let parent = obj(json!({
            "id": "1",
            "releases": [{"id": "9", "_sync": marker("15").to_value()}]
        }));
        let remove = |token: &str| Mutation::RemoveEntry {
            property: "releases".into(),
            entry_id: "9".into(),
            marker: marker(token),
        };

        assert_eq!(
            remove("12").interpret(Some(&parent)),
            Transition::Keep(WriteOutcome::Stale)
        );
        let doc = put(remove("16").interpret(Some(&parent)));
        assert_eq!(doc["releases"], json!([]));
    }

    #[test]
    fn test_set_slot_requires_matching_foreign_key() {
        let child = obj(json!({"id": "9", "launchId": 1}));
        let set = |parent: &str, only_if_present: bool| Mutation::SetSlot {
            property: "launch".into(),
            foreign_key: "launchId".into(),
            parent_id: parent.into(),
            snapshot: obj(json!({"id": parent, "_sync": marker("10").to_value()})),
            marker: marker("10"),
            only_if_present,
        };

        let doc = put(set("1", false).interpret(Some(&child)));
        assert_eq!(doc["launch"]["id"], json!("1"));

        assert_eq!(
            set("2", false).interpret(Some(&child)),
            Transition::Keep(WriteOutcome::Noop)
        );
        assert_eq!(
            set("1", true).interpret(Some(&child)),
            Transition::Keep(WriteOutcome::Noop)
        );
        assert!(matches!(set("1", true).interpret(Some(&doc)), Transition::Put(_)));
    }

    #[test]
    fn test_clear_slot() {
        let child = obj(json!({
            "id": "9",
            "launchId": "1",
            "launch": {"id": "1", "_sync": marker("10").to_value()}
        }));
        let clear = |parent: &str, token: &str| Mutation::ClearSlot {
            property: "launch".into(),
            parent_id: parent.into(),
            marker: marker(token),
        };

        // Another parent's strip leaves the slot and only records itself
        let other = put(clear("2", "11").interpret(Some(&child)));
        assert_eq!(other["launch"], child["launch"]);
        assert_eq!(removal_of(&other, "launch", "2"), Some(marker("11")));

        assert_eq!(
            clear("1", "9").interpret(Some(&child)),
            Transition::Keep(WriteOutcome::Stale)
        );
        let doc = put(clear("1", "11").interpret(Some(&child)));
        assert!(!doc.contains_key("launch"));
        assert_eq!(removal_of(&doc, "launch", "1"), Some(marker("11")));
    }

    #[test]
    fn test_set_slot_older_than_strip_is_stale() {
        let child = obj(json!({"id": "9", "launchId": "1"}));
        let set = |token: &str| Mutation::SetSlot {
            property: "launch".into(),
            foreign_key: "launchId".into(),
            parent_id: "1".into(),
            snapshot: obj(json!({"id": "1", "_sync": marker(token).to_value()})),
            marker: marker(token),
            only_if_present: false,
        };
        let clear = Mutation::ClearSlot {
            property: "launch".into(),
            parent_id: "1".into(),
            marker: marker("12").with_kind(EventKind::Remove),
        };

        let stripped = put(clear.interpret(Some(&child)));
        assert!(!stripped.contains_key("launch"));
        assert_eq!(
            set("10").interpret(Some(&stripped)),
            Transition::Keep(WriteOutcome::Stale)
        );

        let resurrected = put(set("20").interpret(Some(&stripped)));
        assert_eq!(resurrected["launch"]["id"], json!("1"));
        assert!(!resurrected.contains_key(REMOVED_FIELD));
    }

    #[test]
    fn test_replace_root_keeps_removal_records() {
        let current = obj(json!({
            "id": "1",
            "_sync": marker("10").to_value(),
            "_removed": {"releases": {"9": marker("12").to_value()}}
        }));

        let doc = put(replace_root("13", json!({"name": "new"})).interpret(Some(&current)));
        assert_eq!(removal_of(&doc, "releases", "9"), Some(marker("12")));
    }

    #[test]
    fn test_mutation_serializes_with_op_tag() {
        let mutation = Mutation::RemoveEntry {
            property: "releases".into(),
            entry_id: "9".into(),
            marker: marker("12"),
        };
        let value = serde_json::to_value(&mutation).unwrap();

        assert_eq!(value["op"], json!("removeEntry"));
        assert_eq!(value["entryId"], json!("9"));
        assert_eq!(value["marker"]["orderingToken"], json!("12"));
    }
}
