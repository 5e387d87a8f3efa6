//! Arguments handed to a task handler.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TaskError;

/// Positional and keyword arguments of a task.
///
/// Values are JSON so that records stay cloneable and printable no matter
/// what the handler computes with them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskArgs {
    pub positional: Vec<Value>,
    pub keyword: Map<String, Value>,
}

impl TaskArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.positional.push(value.into());
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.keyword.insert(name.into(), value.into());
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.push(value);
        self
    }

    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// Decode the positional argument at `index`.
    pub fn positional<T: DeserializeOwned>(&self, index: usize) -> Result<T, TaskError> {
        let value = self
            .positional
            .get(index)
            .ok_or_else(|| TaskError::new(format!("missing positional argument #{index}")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| TaskError::new(format!("positional argument #{index}: {e}")))
    }

    /// Decode the keyword argument `name`.
    pub fn keyword<T: DeserializeOwned>(&self, name: &str) -> Result<T, TaskError> {
        let value = self
            .keyword
            .get(name)
            .ok_or_else(|| TaskError::new(format!("missing keyword argument '{name}'")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| TaskError::new(format!("keyword argument '{name}': {e}")))
    }

    /// Decode the keyword argument `name`, `None` when it is absent or null.
    pub fn keyword_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, TaskError> {
        match self.keyword.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.keyword(name).map(Some),
        }
    }
}
