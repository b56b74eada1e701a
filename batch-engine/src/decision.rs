// Decision Nodes
// Graph nodes that pick the next edge label without doing step work

use crate::error::BatchResult;
use crate::execution::models::{JobExecution, StepExecution};
use crate::status::FlowStatus;

/// Computes the label of the edge to follow
///
/// Implementations must be deterministic for a given execution and free of
/// I/O, so evaluating the decision again on restart yields the same route.
pub trait JobExecutionDecider: Send + Sync {
    fn decide(
        &self,
        job_execution: &JobExecution,
        last_step: Option<&StepExecution>,
    ) -> BatchResult<FlowStatus>;
}

impl<F> JobExecutionDecider for F
where
    F: Fn(&JobExecution, Option<&StepExecution>) -> BatchResult<FlowStatus> + Send + Sync,
{
    fn decide(
        &self,
        job_execution: &JobExecution,
        last_step: Option<&StepExecution>,
    ) -> BatchResult<FlowStatus> {
        self(job_execution, last_step)
    }
}

/// CONTINUE when the named run parameter is present and non-empty, else COMPLETED
#[derive(Debug, Clone)]
pub struct JobParametersDecider {
    key: String,
}

impl JobParametersDecider {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl JobExecutionDecider for JobParametersDecider {
    fn decide(
        &self,
        job_execution: &JobExecution,
        _last_step: Option<&StepExecution>,
    ) -> BatchResult<FlowStatus> {
        let present = job_execution
            .parameters
            .get_string(&self.key)
            .is_some_and(|value| !value.trim().is_empty());

        Ok(if present {
            FlowStatus::Continue
        } else {
            FlowStatus::Completed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchError;
    use crate::execution::models::JobInstance;
    use crate::parameters::{JobParameters, JobParametersBuilder};

    fn execution(parameters: JobParameters) -> JobExecution {
        let instance = JobInstance {
            id: 1,
            job_name: "userJob".to_string(),
            key: parameters.identity_key(),
            parameters: parameters.clone(),
        };
        JobExecution::new(1, &instance, parameters)
    }

    #[test]
    fn test_parameter_present_continues() {
        let decider = JobParametersDecider::new("date");
        let exec = execution(JobParametersBuilder::new().add_string("date", "2020-11").build());
        assert_eq!(decider.decide(&exec, None).unwrap(), FlowStatus::Continue);
    }

    #[test]
    fn test_parameter_missing_or_blank_completes() {
        let decider = JobParametersDecider::new("date");
        assert_eq!(
            decider.decide(&execution(JobParameters::new()), None).unwrap(),
            FlowStatus::Completed
        );

        let blank = execution(JobParametersBuilder::new().add_string("date", "  ").build());
        assert_eq!(decider.decide(&blank, None).unwrap(), FlowStatus::Completed);
    }

    #[test]
    fn test_closure_decider() {
        let decider = |_: &JobExecution, last: Option<&StepExecution>| -> BatchResult<FlowStatus> {
            match last {
                Some(step) if step.write_count > 0 => Ok(FlowStatus::custom("WROTE")),
                Some(_) => Ok(FlowStatus::custom("EMPTY")),
                None => Err(BatchError::configuration("no previous step")),
            }
        };

        let exec = execution(JobParameters::new());
        let mut step = StepExecution::new(1, 1, "s");
        assert_eq!(decider.decide(&exec, Some(&step)).unwrap().name(), "EMPTY");
        step.write_count = 3;
        assert_eq!(decider.decide(&exec, Some(&step)).unwrap().name(), "WROTE");
        assert!(decider.decide(&exec, None).is_err());
    }
}
