// Job Launcher
// Resolves the job instance, walks the step graph and owns the JobExecution record

use crate::config::EngineConfig;
use crate::error::{BatchError, BatchResult};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::graph::{Job, Node, Target};
use crate::execution::models::{JobExecution, StepExecution};
use crate::parameters::JobParameters;
use crate::repository::JobRepository;
use crate::status::{BatchStatus, FlowStatus};
use crate::step::{StepRunner, StopSignal};

use chrono::Utc;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How a previous execution of the same instance affects a launch
struct LaunchPlan {
    execution: JobExecution,
    history: HashMap<String, StepExecution>,
    resume_at: Option<String>,
    restart: bool,
}

/// Launches jobs against a repository
///
/// Launch refusals (already complete, already running, not restartable) come
/// back as `Err`. Once an execution exists, failures are recorded on it and
/// the execution is returned with a terminal status.
pub struct JobLauncher {
    repository: Arc<dyn JobRepository>,
    config: EngineConfig,
    events: Option<ProgressSender>,
    running: Arc<DashMap<u64, StopSignal>>,
}

impl JobLauncher {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self {
            repository,
            config: EngineConfig::default(),
            events: None,
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn run(&self, job: &Job, parameters: JobParameters) -> BatchResult<JobExecution> {
        self.run_with_stop(job, parameters, StopSignal::new()).await
    }

    /// Request a cooperative stop of a running execution
    ///
    /// Returns false when no execution with that id is running in this launcher.
    pub fn stop(&self, execution_id: u64) -> bool {
        match self.running.get(&execution_id) {
            Some(signal) => {
                info!(execution_id, "stop requested");
                signal.stop();
                true
            }
            None => false,
        }
    }

    pub async fn run_with_stop(
        &self,
        job: &Job,
        parameters: JobParameters,
        stop: StopSignal,
    ) -> BatchResult<JobExecution> {
        let plan = self.prepare(job, parameters).await?;
        let LaunchPlan {
            mut execution,
            history,
            resume_at,
            restart,
        } = plan;

        self.running.insert(execution.id, stop.clone());
        let outcome = self
            .execute(job, &mut execution, &history, resume_at, restart, &stop)
            .await;
        self.running.remove(&execution.id);

        outcome.map(|_| execution)
    }

    /// Apply the incrementer and decide between a fresh run, a restart or a refusal
    async fn prepare(&self, job: &Job, supplied: JobParameters) -> BatchResult<LaunchPlan> {
        let parameters = match job.incrementer() {
            Some(incrementer) => {
                let previous = self.repository.last_instance(job.name()).await?;
                incrementer.next(previous.as_ref().map(|i| &i.parameters), &supplied)?
            }
            None => supplied,
        };

        let key = parameters.identity_key();
        let instance = match self.repository.find_instance(job.name(), &key).await? {
            Some(instance) => instance,
            None => self.repository.create_instance(job.name(), &parameters).await?,
        };

        let previous = self.repository.last_execution(instance.id).await?;
        if let Some(previous) = &previous {
            if previous.status.is_running() {
                return Err(BatchError::JobExecutionAlreadyRunning {
                    job_name: job.name().to_string(),
                    execution_id: previous.id,
                });
            }
            if previous.status == BatchStatus::Completed {
                return Err(BatchError::JobInstanceAlreadyComplete {
                    job_name: job.name().to_string(),
                    parameters: parameters.to_string(),
                });
            }
            if !job.is_restartable() {
                return Err(BatchError::JobRestartNotAllowed(job.name().to_string()));
            }
        }

        let history = match &previous {
            Some(_) => self.repository.step_history(instance.id).await?,
            None => HashMap::new(),
        };

        let mut execution = self
            .repository
            .create_execution(&instance, &parameters)
            .await?;

        let (resume_at, restart) = match previous {
            Some(previous) => {
                debug!(
                    job = %job.name(),
                    previous = previous.id,
                    status = %previous.status,
                    "restarting job instance"
                );
                execution.context = previous.context;
                // Held until the resumed node completes, so a failure there resumes it again
                execution.restart_from = previous.restart_from.clone();
                (previous.restart_from, true)
            }
            None => (None, false),
        };

        Ok(LaunchPlan {
            execution,
            history,
            resume_at,
            restart,
        })
    }

    async fn execute(
        &self,
        job: &Job,
        execution: &mut JobExecution,
        history: &HashMap<String, StepExecution>,
        resume_at: Option<String>,
        restart: bool,
        stop: &StopSignal,
    ) -> BatchResult<()> {
        let started = Instant::now();
        execution.status = BatchStatus::Started;
        execution.start_time = Some(Utc::now());

        info!(
            job = %job.name(),
            execution_id = execution.id,
            parameters = %execution.parameters,
            restart,
            "job started"
        );
        self.events.send_event(ExecutionEvent::job_started(
            job.name(),
            execution.id,
            execution.parameters.to_string(),
            restart,
        ));

        let mut before_failed = false;
        for listener in job.listeners() {
            if let Err(e) = listener.before_job(execution).await {
                self.record_failure(job, execution, &e);
                before_failed = true;
                break;
            }
        }
        self.repository.update_execution(execution).await?;

        let (status, exit_status) = if before_failed {
            (BatchStatus::Failed, FlowStatus::Failed)
        } else {
            let start = resume_at.unwrap_or_else(|| job.start().to_string());
            self.walk(job, execution, history, start, stop).await?
        };

        execution.status = status;
        execution.exit_status = exit_status;
        execution.end_time = Some(Utc::now());

        for listener in job.listeners() {
            if let Err(e) = listener.after_job(execution).await {
                warn!(job = %job.name(), error = %e, "after-job listener failed");
                execution.failures.push(e.to_string());
            }
        }
        self.repository.update_execution(execution).await?;

        let duration = started.elapsed();
        info!(
            job = %job.name(),
            execution_id = execution.id,
            status = %execution.status,
            exit_status = %execution.exit_status,
            duration_ms = duration.as_millis() as u64,
            "job finished"
        );
        self.events.send_event(ExecutionEvent::job_completed(
            job.name(),
            execution.id,
            execution.status,
            execution.exit_status.clone(),
            duration,
        ));
        Ok(())
    }

    /// Follow transitions from `start` until a terminal node, a stop or a fatal error
    ///
    /// Steps that completed in an earlier run of the instance are skipped on
    /// their first visit and their recorded exit status is used for routing.
    async fn walk(
        &self,
        job: &Job,
        execution: &mut JobExecution,
        history: &HashMap<String, StepExecution>,
        start: String,
        stop: &StopSignal,
    ) -> BatchResult<(BatchStatus, FlowStatus)> {
        let runner = StepRunner::new(Arc::clone(&self.repository), job.name(), stop.clone())
            .with_progress(self.events.clone())
            .with_partition_pool_size(self.config.partition_pool_size);

        let mut current = start;
        let mut visited: HashSet<String> = HashSet::new();
        let mut last_step: Option<StepExecution> = None;

        loop {
            if stop.is_stopped() {
                info!(job = %job.name(), node = %current, "stop requested, job stopping");
                return Ok((BatchStatus::Stopped, FlowStatus::Stopped));
            }

            let Some(node) = job.node(&current) else {
                let e = BatchError::configuration(format!("job has no node named '{}'", current));
                self.record_failure(job, execution, &e);
                return Ok((BatchStatus::Failed, FlowStatus::Failed));
            };

            let first_visit = visited.insert(current.clone());
            let mut node_completed = true;
            let status = match node {
                Node::Step(definition) => {
                    let completed = history
                        .get(&current)
                        .filter(|previous| previous.status == BatchStatus::Completed);

                    match completed {
                        Some(previous) if first_visit => {
                            info!(job = %job.name(), step = %current, "step already completed, skipping");
                            self.events.send_event(ExecutionEvent::step_skipped(
                                job.name(),
                                &current,
                                "completed in a previous execution",
                            ));
                            last_step = Some(previous.clone());
                            previous.exit_status.clone()
                        }
                        _ => {
                            let step = match definition.resolve(&execution.parameters) {
                                Ok(step) => step,
                                Err(e) => {
                                    self.record_failure(job, execution, &e);
                                    return Ok((BatchStatus::Failed, FlowStatus::Failed));
                                }
                            };

                            let step_execution = runner.execute(&step, execution, history).await?;
                            if step_execution.status == BatchStatus::Failed {
                                execution.failures.extend(
                                    step_execution
                                        .failures
                                        .iter()
                                        .map(|f| format!("{}: {}", step_execution.step_name, f)),
                                );
                            }
                            node_completed = step_execution.status == BatchStatus::Completed;
                            let stopped = step_execution.status == BatchStatus::Stopped;
                            let exit_status = step_execution.exit_status.clone();
                            execution.upsert_step(step_execution.clone());
                            last_step = Some(step_execution);

                            if stopped {
                                self.repository.update_execution(execution).await?;
                                return Ok((BatchStatus::Stopped, FlowStatus::Stopped));
                            }
                            exit_status
                        }
                    }
                }
                Node::Decision(decider) => {
                    match decider.decide(execution, last_step.as_ref()) {
                        Ok(status) => {
                            debug!(job = %job.name(), decision = %current, status = %status, "decision evaluated");
                            self.events.send_event(ExecutionEvent::decision_evaluated(
                                job.name(),
                                &current,
                                status.clone(),
                            ));
                            status
                        }
                        Err(e) => {
                            let e = BatchError::Decision {
                                node: current.clone(),
                                message: e.to_string(),
                            };
                            self.record_failure(job, execution, &e);
                            return Ok((BatchStatus::Failed, FlowStatus::Failed));
                        }
                    }
                }
            };

            if node_completed && execution.restart_from.as_deref() == Some(current.as_str()) {
                execution.restart_from = None;
            }
            self.repository.update_execution(execution).await?;

            match job.route(&current, &status) {
                Some(Target::Node(next)) => {
                    debug!(job = %job.name(), from = %current, to = %next, label = %status, "transition");
                    current = next.clone();
                }
                Some(Target::End) => return Ok((BatchStatus::Completed, FlowStatus::Completed)),
                Some(Target::Fail) => return Ok((BatchStatus::Failed, FlowStatus::Failed)),
                Some(Target::Stop { restart_at }) => {
                    info!(job = %job.name(), restart_at = %restart_at, "job stopped by transition");
                    execution.restart_from = Some(restart_at.clone());
                    return Ok((BatchStatus::Stopped, FlowStatus::Stopped));
                }
                None => return Ok((status.terminal_batch_status(), status)),
            }
        }
    }

    fn record_failure(&self, job: &Job, execution: &mut JobExecution, e: &BatchError) {
        error!(job = %job.name(), execution_id = execution.id, error = %e, "job failed");
        self.events.send_event(ExecutionEvent::execution_error(
            e.to_string(),
            Some(job.name().to_string()),
            None,
        ));
        execution.failures.push(e.to_string());
    }
}
