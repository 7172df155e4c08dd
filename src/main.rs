use bugtracker_init::{
    bootstrap::{bootstrap, verify, BootstrapError, BootstrapReport, VerifyReport},
    conf::{load_dotenv, AppConfig, BootstrapConfigError},
    store::{MongoStore, StoreError},
    utils::o11y::logging::{build_subscriber, log_error},
};

use std::process::ExitCode;

use clap::Parser;
use tracing::{info, instrument, warn};

/// Create the bug-tracker collections and their unique indexes.
///
/// Safe to run on every start: existing collections and indexes are left as
/// they are.
#[derive(Parser)]
struct Cli {
    /// Path to the configuration file (defaults to config.yaml, or built-in
    /// defaults when that file does not exist)
    #[arg(long, value_name = "FILE")]
    config: Option<String>,

    /// Only check that the collections and indexes exist, change nothing
    #[arg(long)]
    check: bool,

    /// Print the resulting report as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(serde::Serialize)]
#[serde(untagged)]
enum Report {
    Bootstrap(BootstrapReport),
    Verify(VerifyReport),
}

impl Report {
    fn is_complete(&self) -> bool {
        match self {
            Report::Bootstrap(_) => true,
            Report::Verify(report) => report.is_complete(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum RunError {
    #[error("could not load configuration")]
    Config(#[from] BootstrapConfigError),
    #[error("could not create database client")]
    Connect(#[from] StoreError),
    #[error("schema bootstrap failed")]
    Bootstrap(#[from] BootstrapError),
    #[error("could not serialize report")]
    Report(#[from] serde_json::Error),
}

#[instrument(skip_all, fields(check = args.check))]
async fn run(args: Cli) -> Result<bool, RunError> {
    let config = match args.config {
        Some(ref path) => AppConfig::from_path(path)?,
        None => {
            warn!("no config file provided, trying the default path");
            AppConfig::from_default_path()?
        }
    };
    let spec = config.bootstrap_spec();

    let store = MongoStore::connect(&config.database).await?;
    // the client is shut down on every path, success or not
    let outcome = match args.check {
        true => verify(&store, &spec).await.map(Report::Verify),
        false => bootstrap(&store, &spec).await.map(Report::Bootstrap),
    };
    store.shutdown().await;

    let report = outcome?;
    let complete = report.is_complete();
    if !complete {
        warn!("schema is incomplete, run without --check to create it");
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(complete)
}

#[tokio::main]
async fn main() -> ExitCode {
    load_dotenv();

    let args = Cli::parse();

    let subscriber = build_subscriber().expect("failed to build subscriber");
    tracing::subscriber::set_global_default(subscriber).expect("failed to install subscriber");

    match run(args).await {
        Ok(true) => {
            info!("done");
            ExitCode::SUCCESS
        }
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            log_error!(error, "bootstrap aborted");
            eprintln!("error: {}", error_chain(&error));
            ExitCode::FAILURE
        }
    }
}

fn error_chain(error: &RunError) -> String {
    let mut message = error.to_string();
    for source in bugtracker_init::utils::o11y::logging::iter_sources(error) {
        message.push_str(": ");
        message.push_str(&source);
    }
    message
}
