use crate::prefs::prefs_storage_path;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// `glitchviz.log` next to the prefs file.
pub fn default_log_path() -> Option<PathBuf> {
    prefs_storage_path().map(|p| p.with_file_name("glitchviz.log"))
}

/// Install the global subscriber. Events at `info` and above go to the log
/// file. The UI owns the terminal, so with no file they are discarded.
/// `RUST_LOG` overrides the level.
pub fn init(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log directory {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow::anyhow!("install log subscriber: {e}"))
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::sink)
            .try_init()
            .map_err(|e| anyhow::anyhow!("install log subscriber: {e}")),
    }
}
