// helloJob and sharedJob

use batch_engine::{
    BatchResult, FnTasklet, Job, RepeatStatus, RunIdIncrementer, Step, StepScope,
};
use tracing::info;

use super::JobEnv;

pub fn hello_job(_env: &JobEnv) -> BatchResult<Job> {
    Job::builder("helloJob")
        .incrementer(RunIdIncrementer::new())
        .start(Step::builder("helloStep").tasklet(FnTasklet::new(
            |_scope: &mut StepScope<'_>| {
                info!("hello batch");
                Ok(RepeatStatus::Finished)
            },
        )))
        .build()
}

/// Writes one key into each context scope, then reads both back from a later step
pub fn shared_job(_env: &JobEnv) -> BatchResult<Job> {
    let writer = Step::builder("sharedStep").tasklet(FnTasklet::new(|scope: &mut StepScope<'_>| {
        scope.step_context().put_string("stepKey", "step execution context");
        scope.job_context_mut()?.put_string("jobKey", "job execution context");

        info!(
            step = %scope.step_name(),
            run_id = ?scope.parameters.get_long("run.id"),
            "shared context written"
        );
        Ok(RepeatStatus::Finished)
    }));

    let reader = Step::builder("sharedStep2").tasklet(FnTasklet::new(|scope: &mut StepScope<'_>| {
        let job_key = scope.job_context().get_string_or("jobKey", "emptyJobKey").to_string();
        let step_key = scope.step_context().get_string_or("stepKey", "emptyStepKey").to_string();

        info!(job_key = %job_key, step_key = %step_key, "shared context read");
        scope.step_context().put_string("observed", format!("{} / {}", job_key, step_key));
        Ok(RepeatStatus::Finished)
    }));

    Job::builder("sharedJob")
        .incrementer(RunIdIncrementer::new())
        .start(writer)
        .next(reader)
        .build()
}
