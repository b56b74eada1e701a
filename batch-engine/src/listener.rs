// Execution Listeners
// Hooks invoked around job and step runs

use crate::error::BatchResult;
use crate::execution::models::{JobExecution, StepExecution};
use crate::status::FlowStatus;

use async_trait::async_trait;

/// Hooks around one run of a job
#[async_trait]
pub trait JobExecutionListener: Send + Sync {
    /// Called after the execution is started; an error fails the run
    async fn before_job(&self, _job_execution: &mut JobExecution) -> BatchResult<()> {
        Ok(())
    }

    /// Called exactly once, after the terminal status is set
    async fn after_job(&self, _job_execution: &JobExecution) -> BatchResult<()> {
        Ok(())
    }
}

/// Hooks around one run of a step
#[async_trait]
pub trait StepExecutionListener: Send + Sync {
    async fn before_step(&self, _step_execution: &mut StepExecution) {}

    /// A returned status replaces the exit status used for routing
    async fn after_step(&self, _step_execution: &StepExecution) -> Option<FlowStatus> {
        None
    }
}
