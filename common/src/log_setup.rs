use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where and how verbosely to log.
///
/// `RUST_LOG` overrides `base_level` when set. With `directory == None` only
/// the console layer is installed.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub base_level: String,
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
    pub max_log_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: "info".to_string(),
            directory: Some(PathBuf::from("logs")),
            file_prefix: "spotreg".to_string(),
            max_log_files: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogSetupError {
    #[error("invalid log filter `{filter}`")]
    InvalidFilter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to create log directory {path:?}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create log file appender")]
    Appender(#[from] tracing_appender::rolling::InitError),
    #[error("logging already initialized")]
    AlreadyInitialized,
}

pub fn setup_logging(config: &LogConfig) -> Result<(), LogSetupError> {
    let base_filter =
        EnvFilter::try_new(&config.base_level).map_err(|source| LogSetupError::InvalidFilter {
            filter: config.base_level.clone(),
            source,
        })?;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or(base_filter);

    let console_writer = std::io::stdout.and(std::io::stderr.with_min_level(Level::WARN));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true)
        .with_writer(console_writer);

    let file_layer = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LogSetupError::CreateDirectory {
                path: dir.clone(),
                source,
            })?;

            let file_appender = tracing_appender::rolling::Builder::new()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .max_log_files(config.max_log_files.max(1))
                .build(dir)?;

            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            LOG_GUARD
                .set(guard)
                .map_err(|_| LogSetupError::AlreadyInitialized)?;

            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(true)
                    .with_ansi(false)
                    .with_writer(file_writer),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LogSetupError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_is_rejected() {
        let config = LogConfig {
            base_level: "spotreg=loudest".to_string(),
            directory: None,
            ..LogConfig::default()
        };
        let err = setup_logging(&config).unwrap_err();
        assert!(matches!(err, LogSetupError::InvalidFilter { .. }));
    }

    #[test]
    fn second_setup_reports_already_initialized() {
        let dir = std::env::temp_dir().join("spotreg-log-setup-test");
        let config = LogConfig {
            base_level: "debug".to_string(),
            directory: Some(dir.clone()),
            file_prefix: "test".to_string(),
            max_log_files: 1,
        };

        setup_logging(&config).unwrap();
        tracing::info!("logging initialized for test");
        assert!(dir.is_dir());

        let again = setup_logging(&LogConfig {
            directory: None,
            ..config
        });
        assert!(matches!(again, Err(LogSetupError::AlreadyInitialized)));
    }
}
