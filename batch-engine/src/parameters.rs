// Run Parameters
// Typed, immutable launch parameters and the run-id incrementer policy

use crate::error::{BatchError, BatchResult};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key written by [`RunIdIncrementer`]
pub const RUN_ID_KEY: &str = "run.id";

/// Typed value of a single run parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(NaiveDate),
}

impl ParameterValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Date(_) => "date",
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Long(n) => write!(f, "{}", n),
            Self::Double(n) => write!(f, "{}", n),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ParameterValue,
    /// Identifying parameters distinguish one job instance from another
    pub identifying: bool,
}

/// Parameters supplied at launch; never mutated during a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.parameters.get(key).map(|p| &p.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    /// String value; other types are rendered
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }

    /// Long value; string values holding a number are accepted
    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            ParameterValue::Long(n) => Some(*n),
            ParameterValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            ParameterValue::Double(n) => Some(*n),
            ParameterValue::Long(n) => Some(*n as f64),
            ParameterValue::String(s) => s.trim().parse().ok(),
            ParameterValue::Date(_) => None,
        }
    }

    pub fn get_date(&self, key: &str) -> Option<NaiveDate> {
        match self.get(key)? {
            ParameterValue::Date(d) => Some(*d),
            ParameterValue::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.parameters.iter()
    }

    /// Stable rendering of the identifying parameters, sorted by key
    pub fn identity_key(&self) -> String {
        self.parameters
            .iter()
            .filter(|(_, p)| p.identifying)
            .map(|(k, p)| format!("{}={}({})", k, p.value, p.value.type_name()))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Parse `key=value` or `key(type)=value`, type one of string|long|double|date
    pub fn parse_assignment(text: &str) -> BatchResult<(String, ParameterValue)> {
        let (lhs, raw) = text.split_once('=').ok_or_else(|| {
            BatchError::InvalidParameter(format!("'{}' is not of the form key=value", text))
        })?;

        let (key, type_name) = match lhs.split_once('(') {
            Some((key, rest)) => {
                let type_name = rest.strip_suffix(')').ok_or_else(|| {
                    BatchError::InvalidParameter(format!("unterminated type in '{}'", lhs))
                })?;
                (key.trim(), type_name.trim().to_ascii_lowercase())
            }
            None => (lhs.trim(), "string".to_string()),
        };

        if key.is_empty() {
            return Err(BatchError::InvalidParameter(format!(
                "empty key in '{}'",
                text
            )));
        }

        let invalid = |e: &dyn fmt::Display| {
            BatchError::InvalidParameter(format!("{}: cannot parse '{}': {}", key, raw, e))
        };

        let value = match type_name.as_str() {
            "string" => ParameterValue::String(raw.to_string()),
            "long" => ParameterValue::Long(raw.trim().parse().map_err(|e| invalid(&e))?),
            "double" => ParameterValue::Double(raw.trim().parse().map_err(|e| invalid(&e))?),
            "date" => ParameterValue::Date(
                NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| invalid(&e))?,
            ),
            other => {
                return Err(BatchError::InvalidParameter(format!(
                    "unknown parameter type '{}' for '{}'",
                    other, key
                )))
            }
        };

        Ok((key.to_string(), value))
    }

    fn insert(&mut self, key: String, value: ParameterValue, identifying: bool) {
        self.parameters
            .insert(key, JobParameter { value, identifying });
    }
}

impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .parameters
            .iter()
            .map(|(k, p)| format!("{}={}", k, p.value))
            .collect();
        f.write_str(&rendered.join(", "))
    }
}

/// Builder for [`JobParameters`]
#[derive(Debug, Clone, Default)]
pub struct JobParametersBuilder {
    parameters: JobParameters,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing parameters
    pub fn from_parameters(parameters: &JobParameters) -> Self {
        Self {
            parameters: parameters.clone(),
        }
    }

    pub fn add_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .insert(key.into(), ParameterValue::String(value.into()), true);
        self
    }

    pub fn add_long(mut self, key: impl Into<String>, value: i64) -> Self {
        self.parameters
            .insert(key.into(), ParameterValue::Long(value), true);
        self
    }

    pub fn add_double(mut self, key: impl Into<String>, value: f64) -> Self {
        self.parameters
            .insert(key.into(), ParameterValue::Double(value), true);
        self
    }

    pub fn add_date(mut self, key: impl Into<String>, value: NaiveDate) -> Self {
        self.parameters
            .insert(key.into(), ParameterValue::Date(value), true);
        self
    }

    /// Add a parameter that does not take part in instance identity
    pub fn add_non_identifying(mut self, key: impl Into<String>, value: ParameterValue) -> Self {
        self.parameters.insert(key.into(), value, false);
        self
    }

    pub fn add(mut self, key: impl Into<String>, value: ParameterValue) -> Self {
        self.parameters.insert(key.into(), value, true);
        self
    }

    /// Add a parameter from its textual `key(type)=value` form
    pub fn parse(self, assignment: &str) -> BatchResult<Self> {
        let (key, value) = JobParameters::parse_assignment(assignment)?;
        Ok(self.add(key, value))
    }

    pub fn build(self) -> JobParameters {
        self.parameters
    }
}

/// Policy that derives the parameters of the next run of a job
pub trait JobParametersIncrementer: Send + Sync {
    /// `previous` holds the parameters of the job's most recent instance
    fn next(&self, previous: Option<&JobParameters>, supplied: &JobParameters) -> BatchResult<JobParameters>;
}

/// Assigns `run.id` = previous + 1 unless the caller supplied one
#[derive(Debug, Clone)]
pub struct RunIdIncrementer {
    key: String,
}

impl RunIdIncrementer {
    pub fn new() -> Self {
        Self {
            key: RUN_ID_KEY.to_string(),
        }
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for RunIdIncrementer {
    fn default() -> Self {
        Self::new()
    }
}

impl JobParametersIncrementer for RunIdIncrementer {
    fn next(&self, previous: Option<&JobParameters>, supplied: &JobParameters) -> BatchResult<JobParameters> {
        if supplied.contains_key(&self.key) {
            return Ok(supplied.clone());
        }

        let last = previous.and_then(|p| p.get_long(&self.key)).unwrap_or(0);
        let next = last.checked_add(1).ok_or_else(|| {
            BatchError::InvalidParameter(format!("'{}' cannot be incremented past {}", self.key, last))
        })?;
        Ok(JobParametersBuilder::from_parameters(supplied)
            .add_long(self.key.clone(), next)
            .build())
    }
}
