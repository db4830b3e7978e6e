use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{CliError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProjectStatus {
    Creating,
    Deploying,
    Restarting,
    Online,
    Offline,
    Other(String),
}

impl From<String> for ProjectStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "creating" => ProjectStatus::Creating,
            "deploying" => ProjectStatus::Deploying,
            "restarting" => ProjectStatus::Restarting,
            "online" => ProjectStatus::Online,
            "offline" => ProjectStatus::Offline,
            _ => ProjectStatus::Other(raw),
        }
    }
}

impl From<ProjectStatus> for String {
    fn from(status: ProjectStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProjectStatus::Creating => "creating",
            ProjectStatus::Deploying => "deploying",
            ProjectStatus::Restarting => "restarting",
            ProjectStatus::Online => "online",
            ProjectStatus::Offline => "offline",
            ProjectStatus::Other(raw) => raw.as_str(),
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub status: Option<ProjectStatus>,
    #[serde(default)]
    pub regdate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub channel: String,
    #[serde(default)]
    pub credentials: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NluIntegration {
    pub nlu: String,
    #[serde(default)]
    pub credentials: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub log: String,
    #[serde(default)]
    pub regdate: String,
}

/// Downloaded bot code; `code` is the base64-encoded tar+gzip archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBundle {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub dependency: Option<String>,
}

pub type Properties = BTreeMap<String, PropertyValue>;

/// A project property value. Mirrors JSON exactly so values survive the trip
/// through the server unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<PropertyValue>),
    Object(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Parse user input as JSON. With `strict`, input that is not JSON is an
    /// error; otherwise it is kept as a plain string.
    pub fn parse(raw: &str, strict: bool) -> Result<Self> {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Ok(value.into()),
            Err(err) if strict => Err(CliError::InvalidValue(format!(
                "value is not valid JSON ({err}): {raw}"
            ))),
            Err(_) => Ok(PropertyValue::String(raw.to_owned())),
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, PropertyValue>> {
        match self {
            PropertyValue::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => PropertyValue::Null,
            Value::Bool(flag) => PropertyValue::Bool(flag),
            Value::Number(num) => PropertyValue::Number(num),
            Value::String(text) => PropertyValue::String(text),
            Value::Array(items) => {
                PropertyValue::Array(items.into_iter().map(PropertyValue::from).collect())
            }
            Value::Object(map) => PropertyValue::Object(
                map.into_iter()
                    .map(|(key, value)| (key, PropertyValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<PropertyValue> for Value {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Null => Value::Null,
            PropertyValue::Bool(flag) => Value::Bool(flag),
            PropertyValue::Number(num) => Value::Number(num),
            PropertyValue::String(text) => Value::String(text),
            PropertyValue::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            PropertyValue::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(text) => f.write_str(text),
            other => write!(f, "{}", Value::from(other.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn property_value_preserves_nested_json() {
        let raw = json!({"a": [1, 2.5, "x", null, true], "b": {"c": -3}});
        let value = PropertyValue::from(raw.clone());
        let encoded = serde_json::to_value(&value).unwrap();
        assert_eq!(encoded, raw);
        let decoded: PropertyValue = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn lenient_parse_falls_back_to_string() {
        assert_eq!(
            PropertyValue::parse("hello world", false).unwrap(),
            PropertyValue::String("hello world".into())
        );
        assert_eq!(
            PropertyValue::parse("42", false).unwrap(),
            PropertyValue::Number(42.into())
        );
    }

    #[test]
    fn strict_parse_rejects_non_json() {
        let err = PropertyValue::parse("{not json", true).unwrap_err();
        assert!(matches!(err, CliError::InvalidValue(_)));
    }

    #[test]
    fn unknown_status_is_kept_verbatim() {
        let project: Project =
            serde_json::from_value(json!({"id": 1, "name": "bot", "status": "paused"})).unwrap();
        assert_eq!(
            project.status,
            Some(ProjectStatus::Other("paused".into()))
        );
        assert_eq!(project.status.unwrap().to_string(), "paused");
    }
}
