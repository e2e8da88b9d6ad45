//! Logging setup shared by the binaries
//!
//! Events go to stderr and are appended to a per-binary file under the log
//! directory. `RUST_LOG` overrides the configured level.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Where and how verbosely to log.
#[derive(Clone, Debug)]
pub struct LogConfig {
    pub dir: PathBuf,
    /// File name inside `dir`, e.g. `rpc_server.log`
    pub file_name: String,
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl LogConfig {
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>, level: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
            level: level.into(),
        }
    }

    pub fn file_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

fn open_log_file(dir: &Path, path: &Path) -> io::Result<fs::File> {
    fs::create_dir_all(dir)?;
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber. Returns the log file path.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<PathBuf> {
    let path = config.file_path();
    let file = open_log_file(&config.dir, &path)
        .map_err(|e| anyhow::anyhow!("cannot open log file {}: {}", path.display(), e))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()?;

    Ok(path)
}
