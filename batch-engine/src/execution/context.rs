// Execution Context
// Scoped key/value state attached to a job run or a step run

use crate::error::{BatchError, BatchResult};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed value stored in an [`ExecutionContext`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ContextValue {
    String(String),
    Long(i64),
    Double(f64),
    Object(serde_json::Value),
}

impl ContextValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(n) => Some(*n),
            Self::Long(n) => Some(*n as f64),
            _ => None,
        }
    }
}

/// Key/value state of one job run (shared by its steps) or one step run (private)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, ContextValue>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: ContextValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.put(key, ContextValue::String(value.into()));
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) {
        self.put(key, ContextValue::Long(value));
    }

    pub fn put_double(&mut self, key: impl Into<String>, value: f64) {
        self.put(key, ContextValue::Double(value));
    }

    /// Store any serializable value as a JSON object
    pub fn put_object<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> BatchResult<()> {
        let json = serde_json::to_value(value)?;
        self.put(key, ContextValue::Object(json));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ContextValue::as_string)
    }

    pub fn get_string_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_string(key).unwrap_or(default)
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ContextValue::as_long)
    }

    pub fn get_long_or(&self, key: &str, default: i64) -> i64 {
        self.get_long(key).unwrap_or(default)
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ContextValue::as_double)
    }

    pub fn get_object<T: for<'de> Deserialize<'de>>(&self, key: &str) -> BatchResult<Option<T>> {
        match self.get(key) {
            Some(ContextValue::Object(json)) => Ok(Some(serde_json::from_value(json.clone())?)),
            Some(_) => Err(BatchError::configuration(format!(
                "context entry '{}' is not an object",
                key
            ))),
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

/// Access to the job-scoped context from inside a step
///
/// Steps of the main flow share the job context mutably. Partition workers run
/// concurrently and only get a read-only view, so they can never race on it.
pub enum JobContextRef<'a> {
    Shared(&'a mut ExecutionContext),
    ReadOnly {
        context: &'a ExecutionContext,
        step_name: &'a str,
    },
}

impl JobContextRef<'_> {
    pub fn get(&self) -> &ExecutionContext {
        match self {
            Self::Shared(ctx) => &**ctx,
            Self::ReadOnly { context, .. } => *context,
        }
    }

    pub fn get_mut(&mut self) -> BatchResult<&mut ExecutionContext> {
        match self {
            Self::Shared(ctx) => Ok(&mut **ctx),
            Self::ReadOnly { step_name, .. } => {
                Err(BatchError::ReadOnlyJobContext(step_name.to_string()))
            }
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly { .. })
    }

    /// Shorter-lived handle to the same context, for one tasklet invocation
    pub fn reborrow(&mut self) -> JobContextRef<'_> {
        match self {
            Self::Shared(ctx) => JobContextRef::Shared(&mut **ctx),
            Self::ReadOnly { context, step_name } => JobContextRef::ReadOnly {
                context: *context,
                step_name: *step_name,
            },
        }
    }
}
