mod commands;
mod io;
mod jobs;
mod output;

use std::path::PathBuf;

use batch_engine::EngineConfig;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

/// Run the sample batch jobs
#[derive(Parser, Debug)]
#[command(name = "batch", version, about = "Run batch jobs with restartable executions")]
struct Cli {
    /// Engine configuration file (YAML)
    #[arg(long, short = 'c', env = "BATCH_CONFIG", global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter; overrides RUST_LOG
    #[arg(long, env = "BATCH_LOG_LEVEL", global = true, value_name = "FILTER")]
    log_level: Option<String>,

    /// Worker pool size for partitioned steps
    #[arg(long, env = "BATCH_PARTITION_POOL_SIZE", global = true)]
    partition_pool_size: Option<usize>,

    /// Task pool size for the async item pipeline
    #[arg(long, env = "BATCH_ASYNC_POOL_SIZE", global = true)]
    async_pool_size: Option<usize>,

    /// Chunk size used when a job does not set one
    #[arg(long, env = "BATCH_CHUNK_SIZE", global = true)]
    chunk_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a job by name
    Run(commands::run::RunArgs),
    /// List the available jobs
    List,
}

impl Cli {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };

        if let Some(size) = self.partition_pool_size {
            config.partition_pool_size = size;
        }
        if let Some(size) = self.async_pool_size {
            config.async_pool_size = size;
        }
        if let Some(size) = self.chunk_size {
            config.default_chunk_size = size;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match &cli.command {
        Command::Run(args) => commands::run::execute(cli.engine_config()?, args).await,
        Command::List => {
            commands::list::execute();
            Ok(())
        }
    }
}
