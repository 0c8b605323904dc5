use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info,reqwest=warn,hyper=warn";

/// JSON lines to a daily-rotated file under `log_dir`, human-readable lines to stdout.
///
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_logging(log_dir: &str, file_name: &str) {
    let file_appender = rolling::daily(log_dir, file_name);
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}
