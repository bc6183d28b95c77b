use std::sync::Once;
use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    registry, EnvFilter,
};

static INIT: Once = Once::new();

/// Options for the tracing subscriber
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Application name, used for the env-filter default and log file names
    pub app_name: String,
    /// The log level (trace, debug, info, warn, error)
    pub log_level: Level,
    /// JSON log format, useful for log aggregation
    pub json_format: bool,
    /// Directory for daily-rolled log files, None for console only
    pub log_dir: Option<String>,
    /// Whether to log to stdout in addition to files
    pub log_to_stdout: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            app_name: "netron".to_string(),
            log_level: Level::INFO,
            json_format: false,
            log_dir: None,
            log_to_stdout: true,
        }
    }
}

/// Initialize the tracing system. Safe to call more than once; only the
/// first call takes effect.
pub fn init_logging(config: &LogConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{},{app_name}={level}",
                std::env::var("RUST_LOG").unwrap_or_default(),
                app_name = config.app_name,
                level = config.log_level
            ))
        });

        let registry = registry().with(filter);

        match &config.log_dir {
            Some(log_dir) => {
                let file_appender = rolling::daily(log_dir, format!("{}.log", config.app_name));
                let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

                let file_layer = if config.json_format {
                    fmt::layer()
                        .json()
                        .with_writer(non_blocking)
                        .with_span_events(FmtSpan::CLOSE)
                        .boxed()
                } else {
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_span_events(FmtSpan::CLOSE)
                        .boxed()
                };

                if config.log_to_stdout {
                    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_ansi(true);
                    registry.with(file_layer).with(stdout_layer).init();
                } else {
                    registry.with(file_layer).init();
                }
            }
            None => {
                let stdout_layer = if config.json_format {
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stdout)
                        .with_span_events(FmtSpan::CLOSE)
                        .boxed()
                } else {
                    fmt::layer()
                        .with_writer(std::io::stdout)
                        .with_ansi(true)
                        .boxed()
                };
                registry.with(stdout_layer).init();
            }
        }

        tracing::info!("Logging initialized at {} level", config.log_level);
    });
}

/// Default console logging for quick startup
pub fn setup_default_logging() {
    init_logging(&LogConfig::default());
}
