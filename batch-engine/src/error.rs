// Engine Errors
// Single error type shared by the graph, the coordinators and the collaborators

use crate::execution::graph::GraphError;

use thiserror::Error;

/// Result alias used across the engine
pub type BatchResult<T> = Result<T, BatchError>;

/// Errors raised while building or running a job
#[derive(Debug, Error)]
pub enum BatchError {
    /// Invalid job or step definition
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Step graph could not be built
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The instance identified by (job, parameters) already completed
    #[error("job instance already complete: job '{job_name}' with parameters [{parameters}]")]
    JobInstanceAlreadyComplete { job_name: String, parameters: String },

    /// The instance identified by (job, parameters) has a running execution
    #[error("job '{job_name}' is already running (execution {execution_id})")]
    JobExecutionAlreadyRunning { job_name: String, execution_id: u64 },

    /// Restart requested for a job declared non-restartable
    #[error("job '{0}' is not restartable")]
    JobRestartNotAllowed(String),

    /// A run parameter could not be parsed or has the wrong type
    #[error("invalid job parameter: {0}")]
    InvalidParameter(String),

    /// Reader failure (not end-of-data)
    #[error("read failed: {0}")]
    Read(String),

    /// Processor failure, including a panicked or cancelled async task
    #[error("process failed: {0}")]
    Process(String),

    /// Writer failure; the chunk is not committed
    #[error("write failed: {0}")]
    Write(String),

    /// Tasklet failure
    #[error("tasklet failed: {0}")]
    Tasklet(String),

    /// Decision node could not compute a route
    #[error("decision '{node}' failed: {message}")]
    Decision { node: String, message: String },

    /// Partitioner or partition worker failure
    #[error("partitioning failed: {0}")]
    Partition(String),

    /// A partition worker tried to write the job-scoped context
    #[error("job context is read-only inside partition step '{0}'")]
    ReadOnlyJobContext(String),

    /// Job repository failure
    #[error("repository error: {0}")]
    Repository(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl BatchError {
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read(message.into())
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process(message.into())
    }

    pub fn write(message: impl Into<String>) -> Self {
        Self::Write(message.into())
    }

    pub fn tasklet(message: impl Into<String>) -> Self {
        Self::Tasklet(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Launch refusals are returned to the caller instead of being recorded
    pub fn is_launch_refusal(&self) -> bool {
        matches!(
            self,
            Self::JobInstanceAlreadyComplete { .. }
                | Self::JobExecutionAlreadyRunning { .. }
                | Self::JobRestartNotAllowed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BatchError::JobInstanceAlreadyComplete {
            job_name: "userJob".to_string(),
            parameters: "run.id=1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "job instance already complete: job 'userJob' with parameters [run.id=1]"
        );
        assert!(err.is_launch_refusal());
        assert!(!BatchError::write("disk full").is_launch_refusal());
    }

    #[test]
    fn test_graph_error_conversion() {
        let err: BatchError = GraphError::unknown_node("missing target 'x'").into();
        assert!(matches!(err, BatchError::Graph(_)));
        assert!(err.to_string().contains("missing target"));
    }
}
