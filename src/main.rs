//! Cadence - Recurring Job Scheduler
//!
//! Main entry point for the Cadence CLI and scheduler service.

mod cli;
mod cmd_jobs;
mod cmd_next;
mod cmd_run;
mod cmd_validate;
mod handlers;
mod signal;

use clap::Parser;
use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use cadence_config::{Config, ConfigError, ConfigLoader, LoggingConfig};

use cli::{Cli, Commands};

fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Optional file layer with daily rotation
    let file_layer = match logging.directory() {
        Some(log_dir) => {
            std::fs::create_dir_all(&log_dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("cadence")
                .filename_suffix("log")
                .max_log_files(logging.max_log_files)
                .build(&log_dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Keep the writer alive for the program duration
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    let console_layer = if logging.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Load the configuration, falling back to defaults when the file is absent.
fn load_config(cli: &Cli) -> Result<(Config, bool), ConfigError> {
    match ConfigLoader::load(&cli.config) {
        Ok(config) => Ok((config, true)),
        Err(ConfigError::NotFound(_)) => Ok((Config::default(), false)),
        Err(e) => Err(e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            let (config, found) = load_config(&cli)?;
            init_tracing(&config.logging)?;
            if !found {
                warn!(
                    "Config file {} not found, using defaults",
                    cli.config.display()
                );
            }
            cmd_run::run(config).await?;
        }
        Some(Commands::Validate) => {
            cmd_validate::validate(&cli.config)?;
        }
        Some(Commands::Next {
            ref expression,
            count,
            ref after,
        }) => {
            cmd_next::next(expression, count, after.as_deref())?;
        }
        Some(Commands::Jobs {
            ref state_db,
            format,
        }) => {
            let (config, _) = load_config(&cli)?;
            cmd_jobs::jobs(&config, state_db.clone(), format).await?;
        }
    }

    Ok(())
}
