/// File logging.
///
/// The terminal belongs to the dashboard, so log lines go to
/// `<data dir>/todosync.log` instead of stderr. `TODOSYNC_LOG` takes an
/// `EnvFilter` directive (default `todosync=info`). Any failure here leaves
/// logging off and the app running.
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_ENV: &str = "TODOSYNC_LOG";
const DEFAULT_DIRECTIVE: &str = "todosync=info";

pub fn log_path(data_dir: &Path) -> PathBuf {
    data_dir.join("todosync.log")
}

/// Install the global subscriber. Returns the log path when logging is on.
pub fn init(data_dir: &Path) -> Option<PathBuf> {
    let path = log_path(data_dir);
    fs::create_dir_all(data_dir).ok()?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .ok()?;

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false),
        )
        .try_init()
        .ok()?;
    Some(path)
}
