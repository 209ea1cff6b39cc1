use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::error::ActionError;

/// Name and one-line description of an action an integration offers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionSpec {
    pub name: &'static str,
    pub description: &'static str,
}

impl ActionSpec {
    pub const fn new(name: &'static str, description: &'static str) -> Self {
        Self { name, description }
    }
}

/// Result envelope returned to the platform.
///
/// Serializes as `{"result": true, ...data}` on success and
/// `{"result": false, "error": "<message>"}` on failure.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionOutcome {
    Success(Map<String, Value>),
    Failure { error: String },
}

impl ActionOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn to_json(&self) -> Value {
        let mut envelope = Map::new();
        match self {
            Self::Success(data) => {
                envelope.insert("result".to_string(), Value::Bool(true));
                for (key, value) in data {
                    // Data can't shadow the result flag
                    if key != "result" {
                        envelope.insert(key.clone(), value.clone());
                    }
                }
            }
            Self::Failure { error } => {
                envelope.insert("result".to_string(), Value::Bool(false));
                envelope.insert("error".to_string(), Value::String(error.clone()));
            }
        }
        Value::Object(envelope)
    }
}

impl Serialize for ActionOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.to_json() {
            Value::Object(envelope) => {
                let mut map = serializer.serialize_map(Some(envelope.len()))?;
                for (key, value) in &envelope {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            other => other.serialize(serializer),
        }
    }
}

/// Required, non-empty string field of an action's input.
pub fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ActionError> {
    match input.get(field).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(ActionError::InvalidInput(format!("'{}' must not be empty", field))),
        None => Err(ActionError::InvalidInput(format!(
            "missing required string field '{}'",
            field
        ))),
    }
}

pub fn optional_str<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(Value::as_str)
}
