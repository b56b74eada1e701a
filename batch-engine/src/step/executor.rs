// Step Executor
// Runs one step: tasklet loop, commit bookkeeping, listeners and partition fan-out

use crate::error::{BatchError, BatchResult};
use crate::execution::context::{ExecutionContext, JobContextRef};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::models::{JobExecution, StepExecution};
use crate::parameters::JobParameters;
use crate::repository::JobRepository;
use crate::status::{BatchStatus, FlowStatus, RepeatStatus};
use crate::step::tasklet::{StepScope, Tasklet};
use crate::step::{PartitionSpec, Step, StepKind};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Cooperative stop request shared between a launcher and its running steps
///
/// Checked before every tasklet invocation, so a chunk in progress always
/// finishes (commit or fail) before the stop takes effect.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Step execution coordinator
#[derive(Clone)]
pub struct StepRunner {
    repository: Arc<dyn JobRepository>,
    events: Option<ProgressSender>,
    stop: StopSignal,
    partition_pool_size: usize,
    job_name: String,
}

/// A partition worker ready to be spawned
struct PreparedWorker {
    child: StepExecution,
    worker: Step,
    tasklet: Arc<dyn Tasklet>,
}

impl StepRunner {
    pub fn new(repository: Arc<dyn JobRepository>, job_name: impl Into<String>, stop: StopSignal) -> Self {
        Self {
            repository,
            events: None,
            stop,
            partition_pool_size: 1,
            job_name: job_name.into(),
        }
    }

    pub fn with_progress(mut self, events: Option<ProgressSender>) -> Self {
        self.events = events;
        self
    }

    pub fn with_partition_pool_size(mut self, pool_size: usize) -> Self {
        self.partition_pool_size = pool_size.max(1);
        self
    }

    /// Execute `step` within `job_execution` and return its final record
    ///
    /// `history` holds the latest execution of each step name from earlier
    /// runs of the same job instance; an unfinished one donates its context.
    /// Step failures are recorded on the returned execution; `Err` means the
    /// repository could not be updated.
    pub async fn execute(
        &self,
        step: &Step,
        job_execution: &mut JobExecution,
        history: &HashMap<String, StepExecution>,
    ) -> BatchResult<StepExecution> {
        let mut step_execution = self
            .repository
            .create_step_execution(job_execution.id, step.name())
            .await?;

        if let Some(previous) = history.get(step.name()) {
            if previous.status != BatchStatus::Completed {
                debug!(step = %step.name(), previous = previous.id, "restoring step context");
                step_execution.context = previous.context.clone();
            }
        }

        match step.kind() {
            StepKind::Tasklet(tasklet) | StepKind::Chunk { tasklet, .. } => {
                let job_context = JobContextRef::Shared(&mut job_execution.context);
                self.run_tasklet(
                    step,
                    tasklet,
                    &mut step_execution,
                    job_context,
                    &job_execution.parameters,
                )
                .await?;
            }
            StepKind::Partitioned(spec) => {
                self.run_partitioned(step, spec, &mut step_execution, job_execution, history)
                    .await?;
            }
        }

        Ok(step_execution)
    }

    async fn run_tasklet(
        &self,
        step: &Step,
        tasklet: &Arc<dyn Tasklet>,
        step_execution: &mut StepExecution,
        mut job_context: JobContextRef<'_>,
        parameters: &JobParameters,
    ) -> BatchResult<()> {
        let started = Instant::now();
        self.begin(step, step_execution).await?;

        let mut outcome = self
            .drive(tasklet, step_execution, &mut job_context, parameters)
            .await;

        if let Err(e) = tasklet.close().await {
            warn!(step = %step_execution.step_name, error = %e, "tasklet close failed");
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }

        let status = match outcome {
            Ok(status) => status,
            Err(e) => self.record_failure(step_execution, e),
        };

        self.finish(step, step_execution, status, started).await
    }

    /// Invoke the tasklet until it finishes, fails or a stop is requested
    async fn drive(
        &self,
        tasklet: &Arc<dyn Tasklet>,
        step_execution: &mut StepExecution,
        job_context: &mut JobContextRef<'_>,
        parameters: &JobParameters,
    ) -> BatchResult<BatchStatus> {
        tasklet.open(&step_execution.context).await?;

        loop {
            if self.stop.is_stopped() {
                info!(step = %step_execution.step_name, "stop requested, step stopping");
                return Ok(BatchStatus::Stopped);
            }

            let (read, written, filtered) = (
                step_execution.read_count,
                step_execution.write_count,
                step_execution.filter_count,
            );

            let result = {
                let mut scope = StepScope {
                    step_execution: &mut *step_execution,
                    job_context: job_context.reborrow(),
                    parameters,
                };
                tasklet.execute(&mut scope).await
            };

            match result {
                Ok(repeat) => {
                    step_execution.commit_count += 1;
                    if step_execution.read_count > read {
                        self.events.send_event(ExecutionEvent::chunk_committed(
                            &step_execution.step_name,
                            step_execution.read_count - read,
                            step_execution.write_count - written,
                            step_execution.filter_count - filtered,
                        ));
                    }
                    self.repository.update_step_execution(step_execution).await?;

                    if repeat == RepeatStatus::Finished {
                        return Ok(BatchStatus::Completed);
                    }
                }
                Err(e) => {
                    step_execution.rollback_count += 1;
                    return Err(e);
                }
            }
        }
    }

    async fn run_partitioned(
        &self,
        step: &Step,
        spec: &PartitionSpec,
        parent: &mut StepExecution,
        job_execution: &mut JobExecution,
        history: &HashMap<String, StepExecution>,
    ) -> BatchResult<()> {
        let started = Instant::now();
        self.begin(step, parent).await?;

        let status = match self
            .fan_out(step.name(), spec, parent, job_execution, history)
            .await
        {
            Ok(status) => status,
            Err(e) => self.record_failure(parent, e),
        };

        self.finish(step, parent, status, started).await
    }

    /// Run one worker per partition on a bounded pool and fold the results into `parent`
    ///
    /// A failed partition fails the parent but leaves its completed siblings in place.
    async fn fan_out(
        &self,
        step_name: &str,
        spec: &PartitionSpec,
        parent: &mut StepExecution,
        job_execution: &mut JobExecution,
        history: &HashMap<String, StepExecution>,
    ) -> BatchResult<BatchStatus> {
        let partitions = spec.partitioner.partition(spec.grid_size).await?;
        let pool_size = spec.pool_size.unwrap_or(self.partition_pool_size).max(1);
        info!(
            step = %step_name,
            partitions = partitions.len(),
            pool_size,
            "partitioning step"
        );

        let mut prepared = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let child_name = format!("{}:{}", step_name, partition.id);
            let previous = history.get(&child_name);
            if previous.is_some_and(|p| p.status == BatchStatus::Completed) {
                self.events.send_event(ExecutionEvent::step_skipped(
                    &self.job_name,
                    &child_name,
                    "partition already completed",
                ));
                continue;
            }

            let worker = (spec.worker)(&partition)?;
            let tasklet = match worker.kind() {
                StepKind::Tasklet(tasklet) | StepKind::Chunk { tasklet, .. } => Arc::clone(tasklet),
                StepKind::Partitioned(_) => {
                    return Err(BatchError::Partition(format!(
                        "worker of '{}' is itself partitioned",
                        step_name
                    )))
                }
            };

            let mut child = self
                .repository
                .create_step_execution(job_execution.id, &child_name)
                .await?;
            child.context = match previous {
                Some(previous) => previous.context.clone(),
                None => partition.context,
            };
            prepared.push(PreparedWorker {
                child,
                worker,
                tasklet,
            });
        }

        let permits = Arc::new(Semaphore::new(pool_size));
        let job_context = Arc::new(job_execution.context.clone());
        let parameters = Arc::new(job_execution.parameters.clone());
        let mut workers = JoinSet::new();

        for PreparedWorker {
            mut child,
            worker,
            tasklet,
        } in prepared
        {
            let runner = self.clone();
            let permits = Arc::clone(&permits);
            let job_context = Arc::clone(&job_context);
            let parameters = Arc::clone(&parameters);
            let parent_name = step_name.to_string();

            workers.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        child.status = BatchStatus::Failed;
                        child.failures.push(format!("worker pool closed: {}", e));
                        return child;
                    }
                };
                runner
                    .run_worker(&parent_name, &worker, &tasklet, &mut child, &job_context, &parameters)
                    .await;
                child
            });
        }

        let mut children = Vec::new();
        let mut panicked = false;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(child) => children.push(child),
                Err(e) => {
                    error!(step = %step_name, error = %e, "partition worker panicked");
                    parent.failures.push(format!("partition worker panicked: {}", e));
                    panicked = true;
                }
            }
        }
        children.sort_by_key(|child| child.id);

        let mut failed = panicked;
        let mut stopped = false;
        for child in children {
            parent.accumulate(&child);
            match child.status {
                BatchStatus::Failed => {
                    failed = true;
                    parent
                        .failures
                        .push(format!("{}: {}", child.step_name, child.failures.join("; ")));
                }
                BatchStatus::Stopped => stopped = true,
                _ => {}
            }
            job_execution.upsert_step(child);
        }

        Ok(if failed {
            BatchStatus::Failed
        } else if stopped {
            BatchStatus::Stopped
        } else {
            BatchStatus::Completed
        })
    }

    async fn run_worker(
        &self,
        parent_name: &str,
        worker: &Step,
        tasklet: &Arc<dyn Tasklet>,
        child: &mut StepExecution,
        job_context: &ExecutionContext,
        parameters: &JobParameters,
    ) {
        let child_name = child.step_name.clone();
        self.events
            .send_event(ExecutionEvent::partition_started(parent_name, &child_name));

        let view = JobContextRef::ReadOnly {
            context: job_context,
            step_name: &child_name,
        };
        if let Err(e) = self.run_tasklet(worker, tasklet, child, view, parameters).await {
            child.status = BatchStatus::Failed;
            child.failures.push(e.to_string());
        }

        self.events.send_event(ExecutionEvent::partition_completed(
            parent_name,
            &child_name,
            child.status,
        ));
    }

    async fn begin(&self, step: &Step, step_execution: &mut StepExecution) -> BatchResult<()> {
        step_execution.status = BatchStatus::Started;
        step_execution.start_time = Some(Utc::now());

        for listener in step.listeners() {
            listener.before_step(step_execution).await;
        }
        self.repository.update_step_execution(step_execution).await?;

        info!(job = %self.job_name, step = %step_execution.step_name, "step started");
        self.events.send_event(ExecutionEvent::step_started(
            &self.job_name,
            &step_execution.step_name,
        ));
        Ok(())
    }

    async fn finish(
        &self,
        step: &Step,
        step_execution: &mut StepExecution,
        status: BatchStatus,
        started: Instant,
    ) -> BatchResult<()> {
        step_execution.status = status;
        step_execution.exit_status = FlowStatus::from(status);
        step_execution.end_time = Some(Utc::now());

        for listener in step.listeners().iter().rev() {
            if let Some(exit_status) = listener.after_step(step_execution).await {
                step_execution.exit_status = exit_status;
            }
        }
        self.repository.update_step_execution(step_execution).await?;

        info!(
            job = %self.job_name,
            step = %step_execution.step_name,
            status = %step_execution.status,
            exit_status = %step_execution.exit_status,
            read = step_execution.read_count,
            written = step_execution.write_count,
            filtered = step_execution.filter_count,
            "step finished"
        );
        self.events.send_event(ExecutionEvent::StepCompleted {
            job_name: self.job_name.clone(),
            step_name: step_execution.step_name.clone(),
            status: step_execution.status,
            exit_status: step_execution.exit_status.clone(),
            read_count: step_execution.read_count,
            write_count: step_execution.write_count,
            filter_count: step_execution.filter_count,
            duration: started.elapsed(),
        });
        Ok(())
    }

    fn record_failure(&self, step_execution: &mut StepExecution, e: BatchError) -> BatchStatus {
        error!(job = %self.job_name, step = %step_execution.step_name, error = %e, "step failed");
        self.events.send_event(ExecutionEvent::execution_error(
            e.to_string(),
            Some(self.job_name.clone()),
            Some(step_execution.step_name.clone()),
        ));
        step_execution.failures.push(e.to_string());
        BatchStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::partition::{KeyRange, Partition, RangePartitioner};
    use crate::item::reader::ListItemReader;
    use crate::item::writer::{FnItemWriter, ListItemWriter};
    use crate::listener::StepExecutionListener;
    use crate::repository::InMemoryJobRepository;
    use crate::step::tasklet::FnTasklet;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    async fn fixture() -> (Arc<dyn JobRepository>, JobExecution) {
        let repository: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
        let parameters = JobParameters::new();
        let instance = repository.create_instance("testJob", &parameters).await.unwrap();
        let execution = repository
            .create_execution(&instance, &parameters)
            .await
            .unwrap();
        (repository, execution)
    }

    fn runner(repository: &Arc<dyn JobRepository>) -> StepRunner {
        StepRunner::new(Arc::clone(repository), "testJob", StopSignal::new())
            .with_partition_pool_size(4)
    }

    /// Reads one slice of the fixed list per invocation using a saved offset
    struct SlicedListTasklet {
        items: Vec<String>,
        slice: usize,
    }

    #[async_trait]
    impl Tasklet for SlicedListTasklet {
        async fn execute(&self, scope: &mut StepScope<'_>) -> BatchResult<RepeatStatus> {
            let offset = scope.step_execution.read_count as usize;
            if offset >= self.items.len() {
                return Ok(RepeatStatus::Finished);
            }
            let end = (offset + self.slice).min(self.items.len());
            let slice = &self.items[offset..end];
            scope.step_execution.read_count += slice.len() as u64;
            scope.step_execution.write_count += slice.len() as u64;
            Ok(RepeatStatus::Continuable)
        }
    }

    struct ExitOverride;

    #[async_trait]
    impl StepExecutionListener for ExitOverride {
        async fn after_step(&self, step_execution: &StepExecution) -> Option<FlowStatus> {
            (step_execution.write_count == 0).then(|| FlowStatus::custom("NOOP"))
        }
    }

    #[tokio::test]
    async fn test_tasklet_reads_all_slices_once() {
        let (repository, mut job) = fixture().await;
        let items: Vec<String> = (0..100).map(|i| format!("{} hello", i)).collect();
        let step = Step::builder("taskBaseStep").tasklet(SlicedListTasklet { items, slice: 10 });

        let execution = runner(&repository)
            .execute(&step, &mut job, &HashMap::new())
            .await
            .unwrap();

        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.read_count, 100);
        // ten slices plus the invocation that reports FINISHED
        assert_eq!(execution.commit_count, 11);
    }

    #[tokio::test]
    async fn test_listener_overrides_exit_status() {
        let (repository, mut job) = fixture().await;
        let step = Step::builder("emptyStep")
            .listener(ExitOverride)
            .chunk::<u32>(5)
            .reader(ListItemReader::new("empty", Vec::<u32>::new()))
            .writer(ListItemWriter::new())
            .build()
            .unwrap();

        let execution = runner(&repository)
            .execute(&step, &mut job, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.exit_status, FlowStatus::custom("NOOP"));
    }

    #[tokio::test]
    async fn test_write_failure_fails_step_and_is_recorded() {
        let (repository, mut job) = fixture().await;
        let step = Step::builder("failing")
            .chunk::<u32>(2)
            .reader(ListItemReader::new("numbers", vec![1, 2, 3, 4]))
            .writer(FnItemWriter::new(|items: &[u32]| {
                if items.contains(&3) {
                    Err(BatchError::write("disk full"))
                } else {
                    Ok(())
                }
            }))
            .build()
            .unwrap();

        let execution = runner(&repository)
            .execute(&step, &mut job, &HashMap::new())
            .await
            .unwrap();

        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(execution.exit_status, FlowStatus::Failed);
        assert_eq!(execution.write_count, 2);
        assert_eq!(execution.rollback_count, 1);
        assert!(execution.failures[0].contains("disk full"));

        let stored = repository.get_execution(job.id).await.unwrap().unwrap();
        assert_eq!(stored.step_execution("failing").unwrap().status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn test_stop_before_first_chunk() {
        let (repository, mut job) = fixture().await;
        let stop = StopSignal::new();
        stop.stop();
        let step = Step::builder("stopped")
            .chunk::<u32>(2)
            .reader(ListItemReader::new("numbers", vec![1, 2, 3]))
            .writer(ListItemWriter::new())
            .build()
            .unwrap();

        let execution = StepRunner::new(Arc::clone(&repository), "testJob", stop)
            .execute(&step, &mut job, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(execution.status, BatchStatus::Stopped);
        assert_eq!(execution.read_count, 0);
    }

    #[tokio::test]
    async fn test_restart_restores_unfinished_context() {
        let (repository, mut job) = fixture().await;
        let mut previous = StepExecution::new(99, 0, "resumable");
        previous.status = BatchStatus::Failed;
        previous.context.put_long("numbers.read.count", 6);
        let history = HashMap::from([("resumable".to_string(), previous)]);

        let writer = ListItemWriter::new();
        let written = writer.written();
        let step = Step::builder("resumable")
            .chunk::<u32>(3)
            .reader(ListItemReader::new("numbers", (0..10).collect::<Vec<u32>>()))
            .writer(writer)
            .build()
            .unwrap();

        let execution = runner(&repository)
            .execute(&step, &mut job, &history)
            .await
            .unwrap();
        assert_eq!(written.items().await, vec![6, 7, 8, 9]);
        assert_eq!(execution.read_count, 4);
    }

    fn range_worker(
        calls: Arc<AtomicUsize>,
        fail_partition: Option<&'static str>,
    ) -> impl Fn(&Partition) -> BatchResult<Step> + Send + Sync {
        move |partition: &Partition| {
            let calls = Arc::clone(&calls);
            let fail = fail_partition == Some(partition.id.as_str());
            Ok(Step::builder("worker").tasklet(FnTasklet::new(
                move |scope: &mut StepScope<'_>| {
                    if fail {
                        return Err(BatchError::tasklet("partition exploded"));
                    }
                    let range = KeyRange::from_context(&scope.step_execution.context)?;
                    calls.fetch_add(1, Ordering::SeqCst);
                    scope.step_execution.read_count += range.len();
                    scope.step_execution.write_count += range.len();
                    Ok(RepeatStatus::Finished)
                },
            )))
        }
    }

    #[tokio::test]
    async fn test_partitioned_step_aggregates_children() {
        let (repository, mut job) = fixture().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let step = Step::builder("userLevelUpStep")
            .partitioner(RangePartitioner::new(KeyRange::new(1, 400)), 8)
            .worker(range_worker(Arc::clone(&calls), None))
            .pool_size(3)
            .build()
            .unwrap();

        let parent = runner(&repository)
            .execute(&step, &mut job, &HashMap::new())
            .await
            .unwrap();

        assert_eq!(parent.status, BatchStatus::Completed);
        assert_eq!(parent.read_count, 400);
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert_eq!(job.step_executions.len(), 8);
        assert!(job
            .step_execution("userLevelUpStep:partition7")
            .is_some_and(|c| c.status == BatchStatus::Completed));
    }

    #[tokio::test]
    async fn test_failed_partition_keeps_siblings_and_reruns_alone() {
        let (repository, mut job) = fixture().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = Step::builder("levelUp")
            .partitioner(RangePartitioner::new(KeyRange::new(1, 40)), 4)
            .worker(range_worker(Arc::clone(&calls), Some("partition2")))
            .build()
            .unwrap();

        let parent = runner(&repository)
            .execute(&failing, &mut job, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(parent.status, BatchStatus::Failed);
        assert_eq!(parent.write_count, 30);
        assert!(parent.failures.iter().any(|f| f.contains("levelUp:partition2")));

        let history: HashMap<String, StepExecution> = job
            .step_executions
            .iter()
            .map(|s| (s.step_name.clone(), s.clone()))
            .collect();

        let retry_calls = Arc::new(AtomicUsize::new(0));
        let healthy = Step::builder("levelUp")
            .partitioner(RangePartitioner::new(KeyRange::new(1, 40)), 4)
            .worker(range_worker(Arc::clone(&retry_calls), None))
            .build()
            .unwrap();

        let (second_repository, mut second) = fixture().await;
        let parent = runner(&second_repository)
            .execute(&healthy, &mut second, &history)
            .await
            .unwrap();
        assert_eq!(parent.status, BatchStatus::Completed);
        assert_eq!(retry_calls.load(Ordering::SeqCst), 1);
        assert_eq!(parent.write_count, 10);
    }

    #[tokio::test]
    async fn test_partition_worker_cannot_write_job_context() {
        let (repository, mut job) = fixture().await;
        let step = Step::builder("p")
            .partitioner(RangePartitioner::new(KeyRange::new(1, 2)), 2)
            .worker(|_| {
                Ok(Step::builder("w").tasklet(FnTasklet::new(|scope: &mut StepScope<'_>| {
                    scope.job_context_mut()?.put_long("racy", 1);
                    Ok(RepeatStatus::Finished)
                })))
            })
            .build()
            .unwrap();

        let parent = runner(&repository)
            .execute(&step, &mut job, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(parent.status, BatchStatus::Failed);
        assert!(!job.context.contains_key("racy"));
    }

    #[test]
    fn test_stop_signal_is_shared() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_stopped());
        signal.stop();
        assert!(clone.is_stopped());
    }
}
