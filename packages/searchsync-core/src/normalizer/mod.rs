//! Change record normalization
//!
//! Turns one raw stream record into a [`ChangeEvent`], or into a skip
//! decision for records that cannot or need not be synced. Pure and
//! synchronous; no index calls are made for skipped records.

pub mod record;

use std::fmt;
use std::sync::Arc;

use crate::catalog::RelationshipCatalog;
use crate::config::RecordConfig;
use crate::domain::{key_at, ChangeEvent, EventKind, SyncMarker};

pub use record::{unmarshall, unmarshall_image, StreamRecord, StreamRecordData};

/// Why a record was not turned into an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The body is not a stream record
    Undecodable(String),
    MissingKeys,
    MissingOrderingToken,
    UnknownEventName(String),
    /// The image identifying the entity is absent
    MissingImage,
    /// The image lacks an id or an entity type
    MissingIdentity,
    /// Forward compatibility: types outside the catalog are ignored
    UnknownEntityType(String),
}

impl SkipReason {
    pub fn is_malformed(&self) -> bool {
        !matches!(self, SkipReason::UnknownEntityType(_))
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Undecodable(e) => write!(f, "undecodable record: {}", e),
            SkipReason::MissingKeys => f.write_str("record has no keys"),
            SkipReason::MissingOrderingToken => f.write_str("record has no sequence number"),
            SkipReason::UnknownEventName(name) => write!(f, "unknown event name '{}'", name),
            SkipReason::MissingImage => f.write_str("record has no image identifying the entity"),
            SkipReason::MissingIdentity => f.write_str("image has no id or entity type"),
            SkipReason::UnknownEntityType(t) => write!(f, "entity type '{}' is not in the catalog", t),
        }
    }
}

/// Normalizer output
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Event(ChangeEvent),
    Skip(SkipReason),
}

pub struct Normalizer {
    catalog: Arc<RelationshipCatalog>,
    record: RecordConfig,
}

impl Normalizer {
    pub fn new(catalog: Arc<RelationshipCatalog>, record: RecordConfig) -> Self {
        Self { catalog, record }
    }

    /// Normalize a JSON-encoded record (queue message body)
    pub fn normalize_json(&self, body: &str) -> Normalized {
        match serde_json::from_str::<StreamRecord>(body) {
            Ok(record) => self.normalize(&record),
            Err(e) => Normalized::Skip(SkipReason::Undecodable(e.to_string())),
        }
    }

    pub fn normalize(&self, record: &StreamRecord) -> Normalized {
        match self.try_normalize(record) {
            Ok(event) => Normalized::Event(event),
            Err(reason) => Normalized::Skip(reason),
        }
    }

    fn try_normalize(&self, record: &StreamRecord) -> Result<ChangeEvent, SkipReason> {
        let data = record.dynamodb.as_ref().ok_or(SkipReason::MissingKeys)?;
        if data.keys.as_ref().map_or(true, |keys| keys.is_empty()) {
            return Err(SkipReason::MissingKeys);
        }
        let sequence_number = data
            .sequence_number
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(SkipReason::MissingOrderingToken)?;

        let kind = match record.event_name.as_deref() {
            Some("INSERT") | Some("MODIFY") => EventKind::Upsert,
            Some("REMOVE") => EventKind::Remove,
            other => return Err(SkipReason::UnknownEventName(other.unwrap_or_default().to_string())),
        };

        let new_attributes = data.new_image.as_ref().map(unmarshall_image);
        let old_attributes = data.old_image.as_ref().map(unmarshall_image);

        let identifying = match kind {
            EventKind::Upsert => new_attributes.as_ref(),
            EventKind::Remove => old_attributes.as_ref(),
        }
        .ok_or(SkipReason::MissingImage)?;

        let entity_id =
            key_at(identifying, &self.record.id_attribute).ok_or(SkipReason::MissingIdentity)?;
        let entity_type = identifying
            .get(&self.record.entity_type_attribute)
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .ok_or(SkipReason::MissingIdentity)?
            .to_string();

        if !self.catalog.contains(&entity_type) {
            return Err(SkipReason::UnknownEntityType(entity_type));
        }

        let marker = SyncMarker::new(
            sequence_number,
            record.event_id.clone().unwrap_or_default(),
            kind,
            record.event_source_arn.clone().unwrap_or_default(),
        );

        Ok(ChangeEvent {
            entity_type,
            entity_id,
            kind,
            new_attributes: match kind {
                EventKind::Upsert => new_attributes,
                EventKind::Remove => None,
            },
            old_attributes,
            marker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::launch_catalog;
    use crate::domain::OrderingToken;
    use serde_json::{json, Value};

    fn normalizer() -> Normalizer {
        Normalizer::new(Arc::new(launch_catalog()), RecordConfig::default())
    }

    fn record(value: Value) -> StreamRecord {
        serde_json::from_value(value).unwrap()
    }

    fn release_insert() -> Value {
        json!({
            "eventID": "evt-11",
            "eventName": "INSERT",
            "eventSourceARN": "arn:stream",
            "dynamodb": {
                "Keys": {"pk": {"S": "release#9"}},
                "NewImage": {
                    "pk": {"S": "release#9"},
                    "id": {"S": "9"},
                    "entityType": {"S": "release"},
                    "launchId": {"S": "1"}
                },
                "SequenceNumber": "11"
            }
        })
    }

    #[test]
    fn test_upsert_event() {
        let Normalized::Event(event) = normalizer().normalize(&record(release_insert())) else {
            panic!("expected event");
        };

        assert_eq!(event.entity_type, "release");
        assert_eq!(event.entity_id, "9");
        assert_eq!(event.kind, EventKind::Upsert);
        assert_eq!(event.ordering_token(), &OrderingToken::new("11"));
        assert_eq!(event.marker.event_id, "evt-11");
        assert_eq!(event.marker.source_ref, "arn:stream");
        assert_eq!(event.new_attributes.unwrap()["launchId"], json!("1"));
    }

    #[test]
    fn test_remove_uses_prior_image() {
        let raw = json!({
            "eventID": "evt-12",
            "eventName": "REMOVE",
            "dynamodb": {
                "Keys": {"pk": {"S": "release#9"}},
                "OldImage": {
                    "id": {"S": "9"},
                    "entityType": {"S": "release"},
                    "launchId": {"S": "1"}
                },
                "SequenceNumber": "12"
            }
        });

        let Normalized::Event(event) = normalizer().normalize(&record(raw)) else {
            panic!("expected event");
        };
        assert_eq!(event.kind, EventKind::Remove);
        assert!(event.new_attributes.is_none());
        assert_eq!(event.old_attributes.unwrap()["launchId"], json!("1"));
        assert_eq!(event.marker.event_kind, EventKind::Remove);
    }

    #[test]
    fn test_numeric_ids_are_keys() {
        let mut raw = release_insert();
        raw["dynamodb"]["NewImage"]["id"] = json!({"N": "9"});

        let Normalized::Event(event) = normalizer().normalize(&record(raw)) else {
            panic!("expected event");
        };
        assert_eq!(event.entity_id, "9");
    }

    #[test]
    fn test_missing_keys_skipped() {
        let mut raw = release_insert();
        raw["dynamodb"].as_object_mut().unwrap().remove("Keys");
        assert_eq!(
            normalizer().normalize(&record(raw)),
            Normalized::Skip(SkipReason::MissingKeys)
        );

        assert_eq!(
            normalizer().normalize(&StreamRecord::default()),
            Normalized::Skip(SkipReason::MissingKeys)
        );
    }

    #[test]
    fn test_missing_sequence_number_skipped() {
        let mut raw = release_insert();
        raw["dynamodb"]["SequenceNumber"] = json!("");
        assert_eq!(
            normalizer().normalize(&record(raw)),
            Normalized::Skip(SkipReason::MissingOrderingToken)
        );
    }

    #[test]
    fn test_remove_without_prior_image_skipped() {
        let mut raw = release_insert();
        raw["eventName"] = json!("REMOVE");
        assert_eq!(
            normalizer().normalize(&record(raw)),
            Normalized::Skip(SkipReason::MissingImage)
        );
    }

    #[test]
    fn test_missing_identity_skipped() {
        let mut raw = release_insert();
        raw["dynamodb"]["NewImage"].as_object_mut().unwrap().remove("id");
        assert_eq!(
            normalizer().normalize(&record(raw)),
            Normalized::Skip(SkipReason::MissingIdentity)
        );

        let mut raw = release_insert();
        raw["dynamodb"]["NewImage"].as_object_mut().unwrap().remove("entityType");
        assert_eq!(
            normalizer().normalize(&record(raw)),
            Normalized::Skip(SkipReason::MissingIdentity)
        );
    }

    #[test]
    fn test_unknown_entity_type_skipped() {
        let mut raw = release_insert();
        raw["dynamodb"]["NewImage"]["entityType"] = json!({"S": "rocket"});

        let outcome = normalizer().normalize(&record(raw));
        let Normalized::Skip(reason) = outcome else {
            panic!("expected skip");
        };
        assert_eq!(reason, SkipReason::UnknownEntityType("rocket".into()));
        assert!(!reason.is_malformed());
    }

    #[test]
    fn test_unknown_event_name_skipped() {
        let mut raw = release_insert();
        raw["eventName"] = json!("TRUNCATE");
        assert_eq!(
            normalizer().normalize(&record(raw)),
            Normalized::Skip(SkipReason::UnknownEventName("TRUNCATE".into()))
        );
    }

    #[test]
    fn test_normalize_json() {
        let body = release_insert().to_string();
        assert!(matches!(
            normalizer().normalize_json(&body),
            Normalized::Event(_)
        ));

        let Normalized::Skip(reason) = normalizer().normalize_json("not json") else {
            panic!("expected skip");
        };
        assert!(reason.is_malformed());
    }

    #[test]
    fn test_custom_attribute_names() {
        let record_config = RecordConfig {
            id_attribute: "uuid".into(),
            entity_type_attribute: "kind".into(),
        };
        let normalizer = Normalizer::new(Arc::new(launch_catalog()), record_config);

        let raw = json!({
            "eventName": "INSERT",
            "dynamodb": {
                "Keys": {"pk": {"S": "x"}},
                "NewImage": {"uuid": {"S": "u1"}, "kind": {"S": "launch"}},
                "SequenceNumber": "1"
            }
        });
        let Normalized::Event(event) = normalizer.normalize(&record(raw)) else {
            panic!("expected event");
        };
        assert_eq!(event.entity_id, "u1");
        assert_eq!(event.entity_type, "launch");
    }
}
