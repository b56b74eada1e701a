// chunkProcessingJob: a tasklet that pages by hand, then the same work as a chunk step

use async_trait::async_trait;
use batch_engine::{
    BatchResult, FnItemProcessor, FnItemWriter, Job, JobParameters, ListItemReader, RepeatStatus,
    RunIdIncrementer, Step, StepScope, Tasklet,
};
use tracing::info;

use super::JobEnv;

const ITEM_COUNT: usize = 100;

fn items() -> Vec<String> {
    (0..ITEM_COUNT).map(|i| format!("{} hello", i)).collect()
}

fn chunk_size(parameters: &JobParameters, default: usize) -> usize {
    parameters
        .get_long("chunkSize")
        .filter(|n| *n > 0)
        .map_or(default, |n| n as usize)
}

/// Reads one page of a fixed list per invocation, tracking the offset in the read count
pub struct PagedListTasklet {
    items: Vec<String>,
    default_page: usize,
}

impl PagedListTasklet {
    pub fn new(items: Vec<String>, default_page: usize) -> Self {
        Self { items, default_page }
    }
}

#[async_trait]
impl Tasklet for PagedListTasklet {
    async fn execute(&self, scope: &mut StepScope<'_>) -> BatchResult<RepeatStatus> {
        let page = chunk_size(scope.parameters, self.default_page);
        let from = scope.step_execution.read_count as usize;
        if from >= self.items.len() {
            return Ok(RepeatStatus::Finished);
        }

        let to = (from + page).min(self.items.len());
        let slice = &self.items[from..to];
        info!(size = slice.len(), "task item page");
        scope.step_execution.read_count = to as u64;
        Ok(RepeatStatus::Continuable)
    }
}

pub fn chunk_processing_job(env: &JobEnv) -> BatchResult<Job> {
    let default_chunk = env.config.default_chunk_size;

    Job::builder("chunkProcessingJob")
        .incrementer(RunIdIncrementer::new())
        .start(Step::builder("taskBaseStep").tasklet(PagedListTasklet::new(items(), default_chunk)))
        .next_job_scoped("chunkBaseStep", move |parameters: &JobParameters| {
            Step::builder("chunkBaseStep")
                .chunk::<String>(chunk_size(parameters, default_chunk))
                .reader(ListItemReader::new("chunkBaseReader", items()))
                .processor(FnItemProcessor::new(|item: String| {
                    Ok(Some(format!("{}, Spring Batch", item)))
                }))
                .writer(FnItemWriter::new(|items: &[String]| {
                    info!(size = items.len(), "chunk item size");
                    Ok(())
                }))
                .build()
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use batch_engine::{
        BatchStatus, EngineConfig, InMemoryJobRepository, JobLauncher, JobParametersBuilder,
    };
    use std::sync::Arc;

    async fn run(parameters: JobParameters) -> batch_engine::JobExecution {
        let env = JobEnv::new(EngineConfig::default(), std::env::temp_dir());
        JobLauncher::new(Arc::new(InMemoryJobRepository::new()))
            .run(&chunk_processing_job(&env).unwrap(), parameters)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_default_chunk_size() {
        let execution = run(JobParameters::new()).await;
        assert_eq!(execution.status, BatchStatus::Completed);

        let task = execution.step_execution("taskBaseStep").unwrap();
        assert_eq!(task.read_count, 100);
        assert_eq!(task.commit_count, 11);

        let chunk = execution.step_execution("chunkBaseStep").unwrap();
        assert_eq!(chunk.read_count, 100);
        assert_eq!(chunk.write_count, 100);
    }

    #[tokio::test]
    async fn test_chunk_size_parameter() {
        let parameters = JobParametersBuilder::new()
            .add_string("chunkSize", "30")
            .build();
        let execution = run(parameters).await;

        // 30, 30, 30, 10
        let task = execution.step_execution("taskBaseStep").unwrap();
        assert_eq!(task.commit_count, 5);
        let chunk = execution.step_execution("chunkBaseStep").unwrap();
        assert_eq!(chunk.commit_count, 4);
        assert_eq!(chunk.write_count, 100);
    }
}
