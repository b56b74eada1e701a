// Execution Records
// JobInstance, JobExecution and StepExecution as tracked by the repository

use crate::execution::context::ExecutionContext;
use crate::parameters::JobParameters;
use crate::status::{BatchStatus, FlowStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A job identified by its name and identifying parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: u64,
    pub job_name: String,
    /// Identity key of the parameters the instance was created with
    pub key: String,
    pub parameters: JobParameters,
}

/// One run of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: u64,
    pub instance_id: u64,
    pub job_name: String,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: FlowStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Job-scoped context shared by every step of the run
    pub context: ExecutionContext,
    pub step_executions: Vec<StepExecution>,
    /// Node a restart resumes at, set by a stop-and-restart transition
    #[serde(default)]
    pub restart_from: Option<String>,
    #[serde(default)]
    pub failures: Vec<String>,
}

impl JobExecution {
    pub fn new(id: u64, instance: &JobInstance, parameters: JobParameters) -> Self {
        Self {
            id,
            instance_id: instance.id,
            job_name: instance.job_name.clone(),
            parameters,
            status: BatchStatus::Starting,
            exit_status: FlowStatus::custom("UNKNOWN"),
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            context: ExecutionContext::new(),
            step_executions: Vec::new(),
            restart_from: None,
            failures: Vec::new(),
        }
    }

    /// Most recent execution of the named step within this run
    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|s| s.step_name == step_name)
    }

    pub fn duration(&self) -> Option<Duration> {
        elapsed(self.start_time, self.end_time)
    }

    /// Insert or replace a step execution by id
    pub fn upsert_step(&mut self, step: StepExecution) {
        match self.step_executions.iter_mut().find(|s| s.id == step.id) {
            Some(existing) => *existing = step,
            None => self.step_executions.push(step),
        }
    }
}

/// One run of one step within a JobExecution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: u64,
    pub job_execution_id: u64,
    pub step_name: String,
    pub status: BatchStatus,
    pub exit_status: FlowStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Step-scoped context, private to this execution
    pub context: ExecutionContext,
    #[serde(default)]
    pub failures: Vec<String>,
}

impl StepExecution {
    pub fn new(id: u64, job_execution_id: u64, step_name: impl Into<String>) -> Self {
        Self {
            id,
            job_execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            exit_status: FlowStatus::custom("UNKNOWN"),
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            commit_count: 0,
            rollback_count: 0,
            start_time: None,
            end_time: None,
            context: ExecutionContext::new(),
            failures: Vec::new(),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        elapsed(self.start_time, self.end_time)
    }

    /// Add the counts of a partition worker to this (parent) execution
    pub fn accumulate(&mut self, child: &StepExecution) {
        self.read_count += child.read_count;
        self.write_count += child.write_count;
        self.filter_count += child.filter_count;
        self.commit_count += child.commit_count;
        self.rollback_count += child.rollback_count;
    }
}

fn elapsed(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<Duration> {
    let (start, end) = (start?, end?);
    (end - start).to_std().ok()
}
