use std::{
    panic,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Error};
use clap::Parser;
use log::{error, info};

use diskprov::{
    cli::{Cli, Commands},
    config, BackgroundLog, MetricsLayer, MultiLogger, SystemHost, DISKPROV_VERSION,
};
use diskprov_api::{
    constants::METRICS_FILE_NAME,
    error::{InternalError, ProvisionError, ProvisionResultExt, ReportError},
};

/// Metrics are written next to the log file.
fn metrics_path(log_file: &Path) -> PathBuf {
    log_file
        .parent()
        .unwrap_or_else(|| Path::new("/"))
        .join(METRICS_FILE_NAME)
}

fn execute(args: &Cli) -> Result<(), ProvisionError> {
    let config = config::load_config(
        args.command.selection().config.as_deref(),
        args.command.settings(),
    )
    .message("Failed to load configuration")?;
    let host = SystemHost::new(&config.paths);

    match &args.command {
        Commands::Plan { .. } => {
            let plan = diskprov::plan(&host, &config)?;
            let rendered = serde_yaml::to_string(&plan).structured(InternalError::SerializePlan)?;
            print!("{rendered}");
        }
        Commands::Provision { .. } => {
            diskprov::provision(&host, &config)?;
        }
    }

    Ok(())
}

fn run_diskprov(args: &Cli) -> Result<(), ProvisionError> {
    info!("diskprov version: {DISKPROV_VERSION}");

    let res = match panic::catch_unwind(|| execute(args)) {
        Err(e) => Err(ProvisionError::new(InternalError::Panic(format!("{e:?}")))),
        Ok(r) => r,
    };

    // Save the error if requested
    if let Commands::Provision {
        error: Some(error_path),
        ..
    } = &args.command
    {
        if let Err(e) = &res {
            if let Err(e2) = std::fs::write(
                error_path,
                serde_yaml::to_string(e).unwrap_or_default(),
            ) {
                error!("Failed to write error to file: {e2}");
            }
        }
    }

    res.message(format!("Failed to execute '{}' command", args.command))
}

fn setup_logging(args: &Cli) -> Result<(), Error> {
    let env_logger = Box::new(
        env_logger::builder()
            .format_timestamp(None)
            .filter_level(args.verbosity)
            .build(),
    );

    let multilogger = match &args.command {
        // Everything destructive is also kept in the background log
        Commands::Provision { log_file, .. } => MultiLogger::new()
            .with_logger(env_logger)
            .with_logger(BackgroundLog::new(log_file).into_logger()),
        Commands::Plan { .. } => MultiLogger::new()
            .with_logger(env_logger)
            .with_max_level(args.verbosity),
    };

    multilogger.init().context("Logger already registered")
}

fn setup_tracing(args: &Cli) -> Result<(), Error> {
    use tracing_subscriber::{filter, layer::SubscriberExt, Layer};

    if let Commands::Provision { log_file, .. } = &args.command {
        let metrics = MetricsLayer::new(metrics_path(log_file)).with_filter(filter::LevelFilter::INFO);

        tracing::subscriber::set_global_default(
            tracing_subscriber::Registry::default().with(metrics),
        )
        .context("Failed to set global default subscriber")?;
    }

    Ok(())
}

fn main() -> ExitCode {
    // Parse args
    let args = Cli::parse();

    // Initialize the loggers
    if let Err(e) = setup_logging(&args) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(1);
    }

    // Initialize the metrics flow
    if let Err(e) = setup_tracing(&args) {
        error!("Failed to initialize tracing: {e:?}");
        return ExitCode::from(1);
    }

    if let Err(e) = run_diskprov(&args) {
        error!("diskprov failed: {e:?}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_path() {
        assert_eq!(
            metrics_path(Path::new("/var/log/diskprov.log")),
            PathBuf::from("/var/log/diskprov-metrics.jsonl")
        );
        assert_eq!(
            metrics_path(Path::new("diskprov.log")),
            PathBuf::from("diskprov-metrics.jsonl")
        );
    }
}
