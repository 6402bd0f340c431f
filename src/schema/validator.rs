use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::marker::PhantomData;

use crate::error::{RepositoryError, Result};
use crate::model::FieldDef;

/// Validated payload as a JSON object
pub type Record = Map<String, Value>;

/// Per-problem-class payload schema.
///
/// Implementations turn uploaded bytes into a validated record and describe
/// the typed fields the record exposes.
pub trait RecordSchema: Send + Sync {
    /// Schema title, e.g. `KnapsackInstance`
    fn title(&self) -> &str;

    fn fields(&self) -> &[FieldDef];

    fn validate(&self, payload: &[u8]) -> Result<Record>;

    fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// JSON-Schema document describing the payload
    fn json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields()
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    json!({
                        "type": f.field_type.json_type(),
                        "description": f.description,
                    }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .fields()
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        json!({
            "title": self.title(),
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Semantic checks beyond what deserialization enforces
pub trait Validate {
    fn validate(&self) -> std::result::Result<(), String>;
}

/// [`RecordSchema`] backed by a serde model.
pub struct TypedSchema<T> {
    title: String,
    fields: Vec<FieldDef>,
    _model: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new(title: &str, fields: Vec<FieldDef>) -> Self {
        Self {
            title: title.to_string(),
            fields,
            _model: PhantomData,
        }
    }
}

impl<T> RecordSchema for TypedSchema<T>
where
    T: DeserializeOwned + Serialize + Validate,
{
    fn title(&self) -> &str {
        &self.title
    }

    fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    fn validate(&self, payload: &[u8]) -> Result<Record> {
        let model: T = serde_json::from_slice(payload).map_err(|e| {
            RepositoryError::validation(format!("payload is not a valid {}: {}", self.title, e))
        })?;
        model
            .validate()
            .map_err(|e| RepositoryError::validation(format!("{}: {}", self.title, e)))?;

        match serde_json::to_value(&model)? {
            Value::Object(record) => Ok(record),
            _ => Err(RepositoryError::validation(format!(
                "{} must serialize to a JSON object",
                self.title
            ))),
        }
    }
}

/// Reject non-finite or negative numbers
pub fn non_negative(name: &str, value: f64) -> std::result::Result<(), String> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(format!("{} must be a finite non-negative number, got {}", name, value))
    }
}

pub fn positive(name: &str, value: f64) -> std::result::Result<(), String> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(format!("{} must be a finite positive number, got {}", name, value))
    }
}
