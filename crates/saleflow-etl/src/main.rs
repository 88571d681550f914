//! Saleflow ETL - load one sales artifact into the sink

use clap::Parser;
use saleflow_common::logging::{init_logging, LogConfig, LogLevel};
use saleflow_etl::{db, finalize, EtlConfig, EtlError, JobReport, PgSinkWriter, Pipeline, PipelineOptions, Storage};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

const EXIT_USAGE: u8 = 1;
const EXIT_JOB_FAILED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "saleflow-etl")]
#[command(author, version, about = "Stream a sales CSV artifact from object storage into Postgres")]
struct Cli {
    /// Object key of the artifact, e.g. incoming/sales.csv
    artifact: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("saleflow-etl")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.with_env_overrides() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid logging configuration: {e:#}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match run(&cli.artifact).await {
        Ok(report) => {
            match serde_json::to_string(&report.view()) {
                Ok(json) => println!("{json}"),
                Err(e) => error!(error = %e, "Failed to serialize job summary"),
            }
            if report.success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_JOB_FAILED)
            }
        }
        Err(e) => {
            error!(error = %e, "ETL job could not start");
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(artifact_id: &str) -> Result<JobReport, EtlError> {
    finalize::validate_artifact_id(artifact_id)?;

    let config = EtlConfig::load()?;
    let options = PipelineOptions::from_config(&config)?;

    // Database problems surface inside the job so the artifact is still finalized
    let store = Arc::new(Storage::new(config.storage.clone()).await?);
    let pool = db::create_pool(&config.database)?;
    let writer = PgSinkWriter::new(pool).with_migrations(config.run_migrations);
    let pipeline = Pipeline::new(store, Arc::new(writer), options)?;

    info!(artifact = artifact_id, bucket = %config.storage.bucket, "Starting ETL job");
    Ok(pipeline.run(artifact_id).await)
}

/// Usage and configuration problems exit with 1; anything else that stops
/// the job from starting counts as a job failure.
fn exit_code(error: &EtlError) -> u8 {
    match error {
        EtlError::Config(_) | EtlError::Common(_) => EXIT_USAGE,
        _ => EXIT_JOB_FAILED,
    }
}
