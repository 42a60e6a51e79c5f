//! Logging init. Every worker logs through one mutex-guarded writer, so lines from
//! concurrent downloads never interleave.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Opens `path` for appending, creating parent directories as needed.
fn open_log_file(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::OpenOptions::new().create(true).append(true).open(path)
}

/// Initialize logging to `log_file`, or to stderr when none is given.
///
/// The level comes from `RUST_LOG` and defaults to `info`.
pub fn init_logging(log_file: Option<&Path>) -> io::Result<()> {
    let (writer, ansi): (Box<dyn Write + Send>, bool) = match log_file {
        Some(path) => (Box::new(open_log_file(path)?), false),
        None => (Box::new(io::stderr()), console::colors_enabled_stderr()),
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(Mutex::new(writer))
        .with_ansi(ansi)
        .with_target(false)
        .try_init()
        .map_err(io::Error::other)?;

    if let Some(path) = log_file {
        tracing::debug!("cabwatch logging to {}", path.display());
    }
    Ok(())
}
