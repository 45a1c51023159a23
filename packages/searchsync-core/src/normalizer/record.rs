//! Raw change records as delivered by the change feed
//!
//! The feed forwards DynamoDB Streams records verbatim; item images use the
//! DynamoDB attribute-value encoding (`{"S": "x"}`, `{"N": "1"}`, ...).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::domain::Attributes;

/// One change-capture record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    #[serde(rename = "eventID", default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// `INSERT`, `MODIFY` or `REMOVE`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(rename = "eventSourceARN", default, skip_serializing_if = "Option::is_none")]
    pub event_source_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamodb: Option<StreamRecordData>,
}

/// The `dynamodb` section of a stream record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamRecordData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
}

/// Decode an attribute-value encoded item into plain JSON
pub fn unmarshall_image(image: &Map<String, Value>) -> Attributes {
    image
        .iter()
        .map(|(name, value)| (name.clone(), unmarshall(value)))
        .collect()
}

/// Decode one attribute value. Values that are not attribute-value encoded
/// pass through unchanged.
pub fn unmarshall(value: &Value) -> Value {
    let Value::Object(typed) = value else {
        return value.clone();
    };
    if typed.len() != 1 {
        return value.clone();
    }
    let Some((tag, inner)) = typed.iter().next() else {
        return value.clone();
    };

    match (tag.as_str(), inner) {
        ("S", Value::String(s)) | ("B", Value::String(s)) => Value::String(s.clone()),
        ("N", Value::String(n)) => number(n),
        ("BOOL", Value::Bool(b)) => Value::Bool(*b),
        ("NULL", _) => Value::Null,
        ("M", Value::Object(map)) => Value::Object(unmarshall_image(map)),
        ("L", Value::Array(items)) => Value::Array(items.iter().map(unmarshall).collect()),
        ("SS", Value::Array(items)) | ("BS", Value::Array(items)) => Value::Array(items.clone()),
        ("NS", Value::Array(items)) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::String(n) => number(n),
                    other => other.clone(),
                })
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// DynamoDB numbers arrive as strings; keep integers exact
fn number(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::Number(i.into());
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}
