use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const COMMAND_LOG_FILE: &str = "commands.log";

/// Installs the global subscriber.
///
/// With a log directory, events are written as JSON lines to
/// `<log_dir>/commands.log`; the returned guard must live as long as the process
/// or buffered lines are lost. Without one, compact text goes to stderr.
pub fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, InfraError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(log_dir) => {
            fs::create_dir_all(log_dir)?;
            let appender = tracing_appender::rolling::never(log_dir, COMMAND_LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_writer(writer),
                )
                .try_init()
                .map_err(|error| {
                    InfraError::InvalidConfig(format!("failed to install tracing: {error}"))
                })?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_writer(std::io::stderr),
                )
                .try_init()
                .map_err(|error| {
                    InfraError::InvalidConfig(format!("failed to install tracing: {error}"))
                })?;
            Ok(None)
        }
    }
}
