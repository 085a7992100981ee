use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,reqwest=warn,hyper=warn,tungstenite=warn";
const LOG_FILE: &str = "client.log";

pub struct LoggingHandle {
    pub log_path: PathBuf,
    pub guard: WorkerGuard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

/// First valid directive from `TOOLHUB_LOG_FILTER`, then `RUST_LOG`, then the
/// built-in default.
fn filter_directives(lookup: impl Fn(&str) -> Option<String>) -> String {
    ["TOOLHUB_LOG_FILTER", "RUST_LOG"]
        .into_iter()
        .filter_map(&lookup)
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty() && EnvFilter::try_new(value).is_ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

fn log_dir(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("TOOLHUB_LOG_DIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".toolhub").join("logs")))
        .unwrap_or_else(|| std::env::temp_dir().join("toolhub-logs"))
}

/// Logs go to a file so they never interleave with rendered toasts.
pub fn init_logging() -> anyhow::Result<LoggingHandle> {
    let env = |key: &str| std::env::var(key).ok();

    let dir = log_dir(env);
    std::fs::create_dir_all(&dir)?;
    let log_path = dir.join(LOG_FILE);

    let directives = filter_directives(env);
    let format = LogFormat::from_env_value(env("TOOLHUB_LOG_FORMAT").as_deref());

    let appender = tracing_appender::rolling::never(&dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let registry = tracing_subscriber::registry().with(EnvFilter::try_new(&directives)?);
    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_current_span(true),
            )
            .init(),
    }

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_path.display(),
        format = format.as_str(),
        filter = %directives,
        pid = std::process::id(),
    );

    Ok(LoggingHandle { log_path, guard })
}
