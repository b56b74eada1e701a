// Job Repository
// Durable record of job instances, executions and step executions

use crate::error::{BatchError, BatchResult};
use crate::execution::models::{JobExecution, JobInstance, StepExecution};
use crate::parameters::JobParameters;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Storage for execution history, keyed by (job name, identifying parameters)
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn find_instance(&self, job_name: &str, key: &str) -> BatchResult<Option<JobInstance>>;

    /// Most recently created instance of the job, used by incrementers
    async fn last_instance(&self, job_name: &str) -> BatchResult<Option<JobInstance>>;

    async fn create_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> BatchResult<JobInstance>;

    async fn create_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> BatchResult<JobExecution>;

    async fn last_execution(&self, instance_id: u64) -> BatchResult<Option<JobExecution>>;

    async fn get_execution(&self, execution_id: u64) -> BatchResult<Option<JobExecution>>;

    /// All executions of a job, oldest first
    async fn job_executions(&self, job_name: &str) -> BatchResult<Vec<JobExecution>>;

    /// Save the execution header and upsert its step executions
    async fn update_execution(&self, execution: &JobExecution) -> BatchResult<()>;

    async fn create_step_execution(
        &self,
        job_execution_id: u64,
        step_name: &str,
    ) -> BatchResult<StepExecution>;

    async fn update_step_execution(&self, step_execution: &StepExecution) -> BatchResult<()>;

    /// Latest execution of every step name across all runs of an instance
    async fn step_history(&self, instance_id: u64) -> BatchResult<HashMap<String, StepExecution>>;
}

/// Serializable repository contents shared by both implementations
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RepositoryState {
    next_id: u64,
    instances: Vec<JobInstance>,
    executions: Vec<JobExecution>,
}

impl RepositoryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn find_instance(&self, job_name: &str, key: &str) -> Option<JobInstance> {
        self.instances
            .iter()
            .find(|i| i.job_name == job_name && i.key == key)
            .cloned()
    }

    fn last_instance(&self, job_name: &str) -> Option<JobInstance> {
        self.instances
            .iter()
            .filter(|i| i.job_name == job_name)
            .max_by_key(|i| i.id)
            .cloned()
    }

    fn create_instance(&mut self, job_name: &str, parameters: &JobParameters) -> BatchResult<JobInstance> {
        let key = parameters.identity_key();
        if self.find_instance(job_name, &key).is_some() {
            return Err(BatchError::Repository(format!(
                "instance of '{}' with parameters [{}] already exists",
                job_name, parameters
            )));
        }

        let instance = JobInstance {
            id: self.next_id(),
            job_name: job_name.to_string(),
            key,
            parameters: parameters.clone(),
        };
        self.instances.push(instance.clone());
        Ok(instance)
    }

    fn create_execution(&mut self, instance: &JobInstance, parameters: &JobParameters) -> JobExecution {
        let execution = JobExecution::new(self.next_id(), instance, parameters.clone());
        self.executions.push(execution.clone());
        execution
    }

    fn last_execution(&self, instance_id: u64) -> Option<JobExecution> {
        self.executions
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .max_by_key(|e| e.id)
            .cloned()
    }

    fn execution_mut(&mut self, execution_id: u64) -> BatchResult<&mut JobExecution> {
        self.executions
            .iter_mut()
            .find(|e| e.id == execution_id)
            .ok_or_else(|| BatchError::Repository(format!("unknown job execution {}", execution_id)))
    }

    fn update_execution(&mut self, execution: &JobExecution) -> BatchResult<()> {
        let stored = self.execution_mut(execution.id)?;
        let steps = std::mem::take(&mut stored.step_executions);
        *stored = JobExecution {
            step_executions: steps,
            ..execution.clone()
        };
        for step in &execution.step_executions {
            stored.upsert_step(step.clone());
        }
        Ok(())
    }

    fn create_step_execution(&mut self, job_execution_id: u64, step_name: &str) -> BatchResult<StepExecution> {
        let id = self.next_id();
        let step = StepExecution::new(id, job_execution_id, step_name);
        self.execution_mut(job_execution_id)?.upsert_step(step.clone());
        Ok(step)
    }

    fn update_step_execution(&mut self, step: &StepExecution) -> BatchResult<()> {
        self.execution_mut(step.job_execution_id)?
            .upsert_step(step.clone());
        Ok(())
    }

    fn step_history(&self, instance_id: u64) -> HashMap<String, StepExecution> {
        let mut history: HashMap<String, StepExecution> = HashMap::new();
        for step in self
            .executions
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .flat_map(|e| e.step_executions.iter())
        {
            let newer = history
                .get(&step.step_name)
                .map_or(true, |existing| existing.id < step.id);
            if newer {
                history.insert(step.step_name.clone(), step.clone());
            }
        }
        history
    }
}

/// Process-local repository; history is lost when the process exits
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    state: Mutex<RepositoryState>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn find_instance(&self, job_name: &str, key: &str) -> BatchResult<Option<JobInstance>> {
        Ok(self.state.lock().await.find_instance(job_name, key))
    }

    async fn last_instance(&self, job_name: &str) -> BatchResult<Option<JobInstance>> {
        Ok(self.state.lock().await.last_instance(job_name))
    }

    async fn create_instance(&self, job_name: &str, parameters: &JobParameters) -> BatchResult<JobInstance> {
        self.state.lock().await.create_instance(job_name, parameters)
    }

    async fn create_execution(&self, instance: &JobInstance, parameters: &JobParameters) -> BatchResult<JobExecution> {
        Ok(self.state.lock().await.create_execution(instance, parameters))
    }

    async fn last_execution(&self, instance_id: u64) -> BatchResult<Option<JobExecution>> {
        Ok(self.state.lock().await.last_execution(instance_id))
    }

    async fn get_execution(&self, execution_id: u64) -> BatchResult<Option<JobExecution>> {
        let state = self.state.lock().await;
        Ok(state.executions.iter().find(|e| e.id == execution_id).cloned())
    }

    async fn job_executions(&self, job_name: &str) -> BatchResult<Vec<JobExecution>> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .iter()
            .filter(|e| e.job_name == job_name)
            .cloned()
            .collect())
    }

    async fn update_execution(&self, execution: &JobExecution) -> BatchResult<()> {
        self.state.lock().await.update_execution(execution)
    }

    async fn create_step_execution(&self, job_execution_id: u64, step_name: &str) -> BatchResult<StepExecution> {
        self.state
            .lock()
            .await
            .create_step_execution(job_execution_id, step_name)
    }

    async fn update_step_execution(&self, step_execution: &StepExecution) -> BatchResult<()> {
        self.state.lock().await.update_step_execution(step_execution)
    }

    async fn step_history(&self, instance_id: u64) -> BatchResult<HashMap<String, StepExecution>> {
        Ok(self.state.lock().await.step_history(instance_id))
    }
}

/// Repository persisted as one JSON document, rewritten after every change
///
/// Writes go to a sibling temp file that is then renamed over the document,
/// so a crash never leaves a half-written history behind.
#[derive(Debug)]
pub struct FileJobRepository {
    path: PathBuf,
    state: Mutex<RepositoryState>,
}

impl FileJobRepository {
    /// Open the document at `path`, starting empty when it does not exist
    pub async fn open(path: impl AsRef<Path>) -> BatchResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => RepositoryState::default(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RepositoryState::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), executions = state.executions.len(), "opened job repository");

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &RepositoryState) -> BatchResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl JobRepository for FileJobRepository {
    async fn find_instance(&self, job_name: &str, key: &str) -> BatchResult<Option<JobInstance>> {
        Ok(self.state.lock().await.find_instance(job_name, key))
    }

    async fn last_instance(&self, job_name: &str) -> BatchResult<Option<JobInstance>> {
        Ok(self.state.lock().await.last_instance(job_name))
    }

    async fn create_instance(&self, job_name: &str, parameters: &JobParameters) -> BatchResult<JobInstance> {
        let mut state = self.state.lock().await;
        let instance = state.create_instance(job_name, parameters)?;
        self.persist(&state).await?;
        Ok(instance)
    }

    async fn create_execution(&self, instance: &JobInstance, parameters: &JobParameters) -> BatchResult<JobExecution> {
        let mut state = self.state.lock().await;
        let execution = state.create_execution(instance, parameters);
        self.persist(&state).await?;
        Ok(execution)
    }

    async fn last_execution(&self, instance_id: u64) -> BatchResult<Option<JobExecution>> {
        Ok(self.state.lock().await.last_execution(instance_id))
    }

    async fn get_execution(&self, execution_id: u64) -> BatchResult<Option<JobExecution>> {
        let state = self.state.lock().await;
        Ok(state.executions.iter().find(|e| e.id == execution_id).cloned())
    }

    async fn job_executions(&self, job_name: &str) -> BatchResult<Vec<JobExecution>> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .iter()
            .filter(|e| e.job_name == job_name)
            .cloned()
            .collect())
    }

    async fn update_execution(&self, execution: &JobExecution) -> BatchResult<()> {
        let mut state = self.state.lock().await;
        state.update_execution(execution)?;
        self.persist(&state).await
    }

    async fn create_step_execution(&self, job_execution_id: u64, step_name: &str) -> BatchResult<StepExecution> {
        let mut state = self.state.lock().await;
        let step = state.create_step_execution(job_execution_id, step_name)?;
        self.persist(&state).await?;
        Ok(step)
    }

    async fn update_step_execution(&self, step_execution: &StepExecution) -> BatchResult<()> {
        let mut state = self.state.lock().await;
        state.update_step_execution(step_execution)?;
        self.persist(&state).await
    }

    async fn step_history(&self, instance_id: u64) -> BatchResult<HashMap<String, StepExecution>> {
        Ok(self.state.lock().await.step_history(instance_id))
    }
}
