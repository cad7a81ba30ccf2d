//! Subscriber setup for the simulator binary.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::SimError;

/// Log file name used inside the data directory while the dashboard
/// owns the terminal.
pub const LOG_FILE: &str = "simulator.log";

/// Installs the global subscriber. `RUST_LOG` wins over `level`.
///
/// With `file` set, events are appended there without colour codes;
/// otherwise they go to stderr.
pub fn init(level: &str, file: Option<&Path>) -> Result<(), SimError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| SimError::Logging(format!("bad log level {level:?}: {e}")))?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .try_init()
        }
        None => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|e| SimError::Logging(e.to_string()))
}
