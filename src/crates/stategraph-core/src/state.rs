//! State schema and reducers
//!
//! A run's state is a JSON object. Every field the graph may write is
//! declared up front in a [`StateSchema`] together with the [`Reducer`] that
//! merges partial updates into it:
//!
//! | reducer | behaviour |
//! |---|---|
//! | [`OverwriteReducer`] | new value replaces the old one (default) |
//! | [`AppendReducer`] | values are appended to an ordered list |
//! | [`ConcatReducer`] | strings are concatenated |
//!
//! Writing a field that is not declared is an error; it never falls back to
//! overwriting.
//!
//! ```rust
//! use stategraph_core::StateSchema;
//! use serde_json::json;
//!
//! let schema = StateSchema::new()
//!     .overwrite("topic")
//!     .append("sections");
//!
//! let mut state = schema.initial_state(&json!({"topic": "wind"})).unwrap();
//! schema.apply(&mut state, &json!({"sections": ["one"]})).unwrap();
//! schema.apply(&mut state, &json!({"sections": ["two"]})).unwrap();
//! assert_eq!(state["sections"], json!(["one", "two"]));
//!
//! assert!(schema.apply(&mut state, &json!({"unknown": 1})).is_err());
//! ```

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while merging state
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The update names a field the schema does not declare
    #[error("Unknown state field '{field}'")]
    UnknownField { field: String },

    #[error("Reducer '{reducer}' cannot merge field '{field}': {reason}")]
    Reducer {
        field: String,
        reducer: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Merge policy for one state field.
pub trait Reducer: Send + Sync {
    /// Combine the current value with an update. `current` is `Null` when the
    /// field has never been written.
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String>;

    fn name(&self) -> &str;
}

/// New value replaces the old one.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> std::result::Result<Value, String> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }
}

/// Ordered-sequence accumulator: arrays are extended, scalars pushed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        let mut result = match current {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => return Err(format!("current value is not a list: {}", other)),
        };

        match update {
            Value::Array(items) => result.extend(items.iter().cloned()),
            Value::Null => {}
            single => result.push(single.clone()),
        }

        Ok(Value::Array(result))
    }

    fn name(&self) -> &str {
        "append"
    }
}

/// String accumulator: the update is appended to the current text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatReducer;

impl Reducer for ConcatReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        let update = match update {
            Value::String(s) => s.as_str(),
            Value::Null => "",
            other => return Err(format!("update is not a string: {}", other)),
        };

        match current {
            Value::String(s) => Ok(Value::String(format!("{}{}", s, update))),
            Value::Null => Ok(Value::String(update.to_string())),
            other => Err(format!("current value is not a string: {}", other)),
        }
    }

    fn name(&self) -> &str {
        "string-concat"
    }
}

/// Declared fields of a graph's state and their reducers.
///
/// Reducers are fixed once the schema is handed to a graph builder.
#[derive(Clone, Default)]
pub struct StateSchema {
    fields: BTreeMap<String, Arc<dyn Reducer>>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field with an explicit reducer
    pub fn add_field(&mut self, name: impl Into<String>, reducer: impl Reducer + 'static) {
        self.fields.insert(name.into(), Arc::new(reducer));
    }

    pub fn with_field(mut self, name: impl Into<String>, reducer: impl Reducer + 'static) -> Self {
        self.add_field(name, reducer);
        self
    }

    pub fn overwrite(self, name: impl Into<String>) -> Self {
        self.with_field(name, OverwriteReducer)
    }

    pub fn append(self, name: impl Into<String>) -> Self {
        self.with_field(name, AppendReducer)
    }

    pub fn concat(self, name: impl Into<String>) -> Self {
        self.with_field(name, ConcatReducer)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Declared field names in sorted order
    pub fn fields(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn reducer_name(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|r| r.name())
    }

    /// Check that every key of `update` is declared, without touching any state
    pub fn check_fields(&self, update: &Value) -> Result<()> {
        match update {
            Value::Null => Ok(()),
            Value::Object(map) => match map.keys().find(|k| !self.contains(k)) {
                Some(field) => Err(StateError::UnknownField {
                    field: field.clone(),
                }),
                None => Ok(()),
            },
            other => Err(StateError::InvalidState(format!(
                "update must be an object, got {}",
                other
            ))),
        }
    }

    /// Merge a partial update into `state` using each field's reducer.
    ///
    /// All fields are validated before the first write, so a rejected update
    /// leaves `state` unchanged. A `Null` update is a no-op.
    pub fn apply(&self, state: &mut Value, update: &Value) -> Result<()> {
        self.check_fields(update)?;
        let Value::Object(update) = update else {
            return Ok(());
        };

        let state = state
            .as_object_mut()
            .ok_or_else(|| StateError::InvalidState("state must be an object".to_string()))?;

        let mut reduced = Vec::with_capacity(update.len());
        for (field, value) in update {
            // check_fields guarantees the reducer exists
            let Some(reducer) = self.fields.get(field) else {
                continue;
            };
            let current = state.get(field).unwrap_or(&Value::Null);
            let merged = reducer
                .reduce(current, value)
                .map_err(|reason| StateError::Reducer {
                    field: field.clone(),
                    reducer: reducer.name().to_string(),
                    reason,
                })?;
            reduced.push((field.clone(), merged));
        }

        for (field, value) in reduced {
            state.insert(field, value);
        }
        Ok(())
    }

    /// Build a fresh state from caller input, applying reducers to an empty state
    pub fn initial_state(&self, input: &Value) -> Result<Value> {
        let mut state = Value::Object(Map::new());
        self.apply(&mut state, input)?;
        Ok(state)
    }

    /// Keep only the declared fields of `value`
    pub fn project(&self, value: &Value) -> Value {
        let projected = value
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(k, _)| self.contains(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Map<_, _>>()
            })
            .unwrap_or_default();
        Value::Object(projected)
    }
}

impl std::fmt::Debug for StateSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.fields.iter().map(|(k, r)| (k, r.name())))
            .finish()
    }
}

/// Overlay `overlay`'s keys on top of `base` without reducers.
///
/// Used to seed a fan-out branch: the branch input wins over the shared state
/// for that branch only.
pub fn overlay(base: &Value, overlay: &Value) -> Value {
    let mut result = base.clone();
    if let (Some(target), Some(extra)) = (result.as_object_mut(), overlay.as_object()) {
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }
    result
}
