// Tasklets
// The callable unit a step repeats until it reports FINISHED

use crate::error::BatchResult;
use crate::execution::context::{ExecutionContext, JobContextRef};
use crate::execution::models::StepExecution;
use crate::parameters::JobParameters;
use crate::status::RepeatStatus;

use async_trait::async_trait;

/// What a tasklet sees during one invocation
pub struct StepScope<'a> {
    pub step_execution: &'a mut StepExecution,
    pub job_context: JobContextRef<'a>,
    pub parameters: &'a JobParameters,
}

impl StepScope<'_> {
    pub fn step_name(&self) -> &str {
        &self.step_execution.step_name
    }

    /// Context private to this step execution
    pub fn step_context(&mut self) -> &mut ExecutionContext {
        &mut self.step_execution.context
    }

    pub fn job_context(&self) -> &ExecutionContext {
        self.job_context.get()
    }

    /// Writable job context; fails inside partition workers
    pub fn job_context_mut(&mut self) -> BatchResult<&mut ExecutionContext> {
        self.job_context.get_mut()
    }
}

/// Step logic invoked repeatedly until it returns [`RepeatStatus::Finished`]
///
/// The step execution is saved after every successful invocation, so each
/// invocation is a commit point.
#[async_trait]
pub trait Tasklet: Send + Sync {
    async fn execute(&self, scope: &mut StepScope<'_>) -> BatchResult<RepeatStatus>;

    /// Called once before the first invocation with the step context
    async fn open(&self, _context: &ExecutionContext) -> BatchResult<()> {
        Ok(())
    }

    /// Called once after the last invocation, whatever the outcome
    async fn close(&self) -> BatchResult<()> {
        Ok(())
    }
}

/// Wraps a synchronous closure as a tasklet
pub struct FnTasklet<F> {
    f: F,
}

impl<F> FnTasklet<F>
where
    F: Fn(&mut StepScope<'_>) -> BatchResult<RepeatStatus> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Tasklet for FnTasklet<F>
where
    F: Fn(&mut StepScope<'_>) -> BatchResult<RepeatStatus> + Send + Sync,
{
    async fn execute(&self, scope: &mut StepScope<'_>) -> BatchResult<RepeatStatus> {
        (self.f)(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchError;

    #[tokio::test]
    async fn test_fn_tasklet_sees_both_scopes() {
        let tasklet = FnTasklet::new(|scope: &mut StepScope<'_>| {
            scope.step_context().put_string("stepKey", "step execution context");
            scope.job_context_mut()?.put_string("jobKey", "job execution context");
            Ok(RepeatStatus::Finished)
        });

        let mut step = StepExecution::new(1, 1, "shareStep");
        let mut job = ExecutionContext::new();
        let params = JobParameters::new();

        let status = {
            let mut scope = StepScope {
                step_execution: &mut step,
                job_context: JobContextRef::Shared(&mut job),
                parameters: &params,
            };
            assert_eq!(scope.step_name(), "shareStep");
            tasklet.execute(&mut scope).await.unwrap()
        };

        assert_eq!(status, RepeatStatus::Finished);
        assert_eq!(step.context.get_string("stepKey"), Some("step execution context"));
        assert_eq!(job.get_string("jobKey"), Some("job execution context"));
    }

    #[tokio::test]
    async fn test_read_only_job_context_rejects_writes() {
        let tasklet = FnTasklet::new(|scope: &mut StepScope<'_>| {
            scope.job_context_mut()?.put_long("x", 1);
            Ok(RepeatStatus::Finished)
        });

        let mut step = StepExecution::new(1, 1, "worker:partition0");
        let job = ExecutionContext::new();
        let params = JobParameters::new();
        let mut scope = StepScope {
            step_execution: &mut step,
            job_context: JobContextRef::ReadOnly {
                context: &job,
                step_name: "worker:partition0",
            },
            parameters: &params,
        };

        let err = tasklet.execute(&mut scope).await.unwrap_err();
        assert!(matches!(err, BatchError::ReadOnlyJobContext(_)));
    }
}
