// Engine Configuration
// Worker pool sizes, chunk defaults and job repository selection

use crate::error::{BatchError, BatchResult};
use crate::repository::{FileJobRepository, InMemoryJobRepository, JobRepository};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Engine settings, loadable from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrent partition workers per partitioned step
    pub partition_pool_size: usize,
    /// Concurrent processing tasks per async item processor
    pub async_pool_size: usize,
    /// Chunk size used when a job does not supply one
    pub default_chunk_size: usize,
    pub repository: RepositoryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            partition_pool_size: parallelism,
            async_pool_size: parallelism,
            default_chunk_size: 10,
            repository: RepositoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub kind: RepositoryKind,
    /// JSON document for the file repository (default: <data dir>/batch/repository.json)
    pub path: Option<PathBuf>,
}

impl RepositoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_repository_path)
    }
}

fn default_repository_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("batch")
        .join("repository.json")
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> BatchResult<Self> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> BatchResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> BatchResult<()> {
        if self.partition_pool_size == 0 {
            return Err(BatchError::configuration("partition_pool_size must be at least 1"));
        }
        if self.async_pool_size == 0 {
            return Err(BatchError::configuration("async_pool_size must be at least 1"));
        }
        if self.default_chunk_size == 0 {
            return Err(BatchError::configuration("default_chunk_size must be at least 1"));
        }
        Ok(())
    }

    /// Open the configured job repository
    pub async fn build_repository(&self) -> BatchResult<Arc<dyn JobRepository>> {
        Ok(match self.repository.kind {
            RepositoryKind::Memory => Arc::new(InMemoryJobRepository::new()),
            RepositoryKind::File => {
                Arc::new(FileJobRepository::open(self.repository.resolved_path()).await?)
            }
        })
    }
}
