// Execution Statuses
// Lifecycle status of job/step runs and the flow labels used for routing

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a JobExecution or StepExecution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Starting,
    Started,
    Completed,
    Failed,
    Stopped,
}

impl BatchStatus {
    /// A status that will not change any more
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Starting | Self::Started)
    }

    /// Failed and stopped runs can be picked up again
    pub fn is_restartable(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Named outcome of a step or decision; also the label on a graph edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum FlowStatus {
    Completed,
    Failed,
    Stopped,
    Continue,
    Custom(String),
}

impl FlowStatus {
    pub fn custom(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
            Self::Continue => "CONTINUE",
            Self::Custom(name) => name,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Default edge tried when no edge carries this exact label
    pub fn default_route(&self) -> FlowStatus {
        match self {
            Self::Failed => Self::Failed,
            _ => Self::Completed,
        }
    }

    /// Batch status a job ends with when this is its last flow status
    pub fn terminal_batch_status(&self) -> BatchStatus {
        match self {
            Self::Failed => BatchStatus::Failed,
            Self::Stopped => BatchStatus::Stopped,
            _ => BatchStatus::Completed,
        }
    }
}

impl From<BatchStatus> for FlowStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Completed => Self::Completed,
            BatchStatus::Failed => Self::Failed,
            BatchStatus::Stopped => Self::Stopped,
            BatchStatus::Starting | BatchStatus::Started => Self::Custom("UNKNOWN".to_string()),
        }
    }
}

impl From<String> for FlowStatus {
    fn from(name: String) -> Self {
        match name.as_str() {
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "STOPPED" => Self::Stopped,
            "CONTINUE" => Self::Continue,
            _ => Self::Custom(name),
        }
    }
}

impl From<&str> for FlowStatus {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<FlowStatus> for String {
    fn from(status: FlowStatus) -> Self {
        status.name().to_string()
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned by a tasklet after each invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// Call the tasklet again
    Continuable,
    /// The step's work is done
    Finished,
}

impl RepeatStatus {
    pub fn continue_if(condition: bool) -> Self {
        if condition {
            Self::Continuable
        } else {
            Self::Finished
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_status_names_round_trip() {
        for name in ["COMPLETED", "FAILED", "STOPPED", "CONTINUE", "NOOP"] {
            assert_eq!(FlowStatus::from(name).name(), name);
        }
        assert_eq!(FlowStatus::from("CONTINUE"), FlowStatus::Continue);
        assert_eq!(FlowStatus::custom("NOOP"), FlowStatus::Custom("NOOP".to_string()));
    }

    #[test]
    fn test_default_routes() {
        assert_eq!(FlowStatus::Failed.default_route(), FlowStatus::Failed);
        assert_eq!(FlowStatus::Continue.default_route(), FlowStatus::Completed);
        assert_eq!(FlowStatus::Stopped.default_route(), FlowStatus::Completed);
        assert_eq!(FlowStatus::Stopped.terminal_batch_status(), BatchStatus::Stopped);
        assert_eq!(FlowStatus::custom("X").default_route(), FlowStatus::Completed);
        assert_eq!(
            FlowStatus::custom("X").terminal_batch_status(),
            BatchStatus::Completed
        );
    }

    #[test]
    fn test_serialized_as_plain_name() {
        let json = serde_json::to_string(&FlowStatus::Continue).unwrap();
        assert_eq!(json, "\"CONTINUE\"");
        let status: FlowStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(status, FlowStatus::Failed);
    }

    #[test]
    fn test_repeat_status() {
        assert_eq!(RepeatStatus::continue_if(true), RepeatStatus::Continuable);
        assert_eq!(RepeatStatus::continue_if(false), RepeatStatus::Finished);
    }
}
