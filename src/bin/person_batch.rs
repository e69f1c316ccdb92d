//! Command line trigger of the person ETL job.

use std::{path::PathBuf, process, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbeam_channel::bounded;
use log::{error, info};
use person_batch::{
    config::{BatchConfig, ExecutionMode},
    core::{
        launch::{JobLauncher, Scheduler},
        step::BatchStatus,
    },
    pipeline::{self, PersonEtlJob},
};
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "person-batch", version, about = "Imports person files into SQLite and exports them back")]
struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    input_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    input_pattern: Option<String>,

    /// Directory receiving the export file and archived inputs
    #[arg(long, global = true)]
    output_path: Option<PathBuf>,

    #[arg(long, global = true)]
    database_url: Option<String>,

    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    #[arg(long, global = true, value_enum)]
    execution_mode: Option<ExecutionMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the job once and exit with status 1 if it failed
    Run,
    /// Run the job on a fixed interval until interrupted
    Schedule {
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop after this many milliseconds instead of waiting for Ctrl-C
        #[arg(long)]
        stop_after_ms: Option<u64>,
    },
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<BatchConfig> {
        let mut config = match &self.config {
            Some(path) => BatchConfig::from_path(path)?,
            None => BatchConfig::default(),
        };

        if let Some(input_dir) = &self.input_dir {
            config.input_dir = input_dir.clone();
        }
        if let Some(input_pattern) = &self.input_pattern {
            config.input_pattern = input_pattern.clone();
        }
        if let Some(output_path) = &self.output_path {
            config.output_path = output_path.clone();
        }
        if let Some(database_url) = &self.database_url {
            config.database_url = database_url.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(execution_mode) = self.execution_mode {
            config.execution_mode = execution_mode;
        }
        if let Commands::Schedule {
            interval_ms: Some(interval_ms),
            ..
        } = self.command
        {
            config.schedule_interval_ms = interval_ms;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match execute(&cli) {
        Ok(BatchStatus::Completed) => {}
        Ok(status) => {
            eprintln!("Job finished with status {:?}", status);
            process::exit(1);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn execute(cli: &Cli) -> anyhow::Result<BatchStatus> {
    let config = cli.load_config()?;
    let runtime = Runtime::new().context("cannot start the tokio runtime")?;
    let _guard = runtime.enter();

    let pool = runtime
        .block_on(pipeline::connect(&config.database_url))
        .context("cannot open the database")?;
    runtime.block_on(pipeline::init_schema(&pool))?;

    let interval = config.schedule_interval();
    let job = PersonEtlJob::new(config, pool, runtime.handle().clone())?;
    let launcher = JobLauncher::new();

    match cli.command {
        Commands::Run => {
            let execution = launcher.launch(&job)?;
            println!("{:?}", execution.status);
            Ok(execution.status)
        }
        Commands::Schedule { stop_after_ms, .. } => {
            let (shutdown_sender, shutdown_receiver) = bounded::<()>(1);
            runtime.spawn(async move {
                match stop_after_ms {
                    Some(ms) => {
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => {}
                            _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                        }
                    }
                    None => {
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                let _ = shutdown_sender.send(());
            });

            let report = Scheduler::new(&launcher, interval).run(&job, &shutdown_receiver);
            info!(
                "Scheduler stopped after {} runs, {} refused launches",
                report.executions.len(),
                report.rejected
            );

            let status = report
                .executions
                .last()
                .map_or(BatchStatus::Completed, |execution| execution.status);
            println!("{:?}", status);
            Ok(status)
        }
    }
}
