use std::path::Path;
use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

const DEFAULT_FILTER: &str = "azchat=info,azchat_core=info";

/// Send logs to `<dir>/azchat.log`. The terminal belongs to the UI, so
/// nothing is written to stdout or stderr.
///
/// Keep the returned guard alive for the whole run or buffered lines are lost.
pub fn init(dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(dir)?;
    let file_appender = tracing_appender::rolling::never(dir, "azchat.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::Layer::new().with_writer(non_blocking).with_ansi(false));
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(guard)
}
