use clap::ValueEnum;
use serde::Deserialize;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Name of the catalog document inside the archive.
pub const CATALOG_FILE: &str = "products.xml";

/// Which extraction tool to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// Pick by host platform.
    Auto,
    /// The Windows built-in `expand.exe`.
    Expand,
    /// `cabextract`, available on most Unix-like systems.
    Cabextract,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("`{program}` was not found; is it installed and on PATH?")]
    MissingTool { program: String },
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` did not finish within {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
    #[error("`{program}` exited with {status}")]
    Failed {
        program: String,
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
}

/// Pulls the catalog document out of a downloaded CAB archive.
///
/// Implementations only describe the external command; [`run_extractor`] runs it
/// with a time limit and turns every outcome into a `Result`.
pub trait Extractor: Send + Sync {
    /// Human readable tool name, used in log lines.
    fn name(&self) -> &str;

    /// The command that extracts `archive` into `output_dir`.
    fn command(&self, archive: &Path, output_dir: &Path) -> Command;
}

/// Extracts only `products.xml` with the Windows `expand` utility.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsExpandExtractor;

impl Extractor for WindowsExpandExtractor {
    fn name(&self) -> &str {
        "expand"
    }

    fn command(&self, archive: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new("expand");
        cmd.arg(archive)
            .arg(format!("-F:{}", CATALOG_FILE))
            .arg(output_dir.join(CATALOG_FILE));
        cmd
    }
}

/// Extracts the whole archive with `cabextract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixCabextractExtractor;

impl Extractor for UnixCabextractExtractor {
    fn name(&self) -> &str {
        "cabextract"
    }

    fn command(&self, archive: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new("cabextract");
        cmd.arg("-d").arg(output_dir).arg(archive);
        cmd
    }
}

/// Returns `true` when running on Windows.
pub fn is_windows() -> bool {
    cfg!(windows)
}

/// Picks the extractor once at startup.
///
/// `platform_is_windows` decides what [`ExtractorKind::Auto`] resolves to; pass
/// [`is_windows`] outside of tests.
pub fn select_extractor(
    kind: ExtractorKind,
    platform_is_windows: impl Fn() -> bool,
) -> Arc<dyn Extractor> {
    match kind {
        ExtractorKind::Expand => Arc::new(WindowsExpandExtractor),
        ExtractorKind::Cabextract => Arc::new(UnixCabextractExtractor),
        ExtractorKind::Auto if platform_is_windows() => Arc::new(WindowsExpandExtractor),
        ExtractorKind::Auto => Arc::new(UnixCabextractExtractor),
    }
}

/// Runs `extractor` on `archive` and waits at most `timeout` for it.
///
/// Output is captured; on failure it is part of the returned error. The child is
/// killed if the time limit is hit.
pub async fn run_extractor(
    extractor: &dyn Extractor,
    archive: &Path,
    output_dir: &Path,
    timeout: Duration,
) -> Result<(), ExtractError> {
    let program = extractor.name().to_string();
    let mut cmd = extractor.command(archive, output_dir);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {} on {}", program, archive.display());

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => return Err(ExtractError::TimedOut { program, timeout }),
        Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ExtractError::MissingTool { program });
        }
        Ok(Err(source)) => return Err(ExtractError::Spawn { program, source }),
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        return Err(ExtractError::Failed {
            program,
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    debug!("{} finished for {}", program, archive.display());
    Ok(())
}

/// Like [`run_extractor`], but logs the failure and reports it as `false`.
pub async fn extract_archive(
    extractor: &dyn Extractor,
    archive: &Path,
    output_dir: &Path,
    timeout: Duration,
) -> bool {
    match run_extractor(extractor, archive, output_dir, timeout).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Error extracting {}: {}", archive.display(), e);
            if let ExtractError::Failed { stdout, stderr, .. } = &e {
                if !stdout.is_empty() {
                    warn!("stdout: {}", stdout);
                }
                if !stderr.is_empty() {
                    warn!("stderr: {}", stderr);
                }
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_expand_requests_only_the_catalog() {
        let cmd = WindowsExpandExtractor.command(Path::new("a/archive.cab"), Path::new("out"));

        assert_eq!(cmd.as_std().get_program(), OsStr::new("expand"));
        assert_eq!(
            args(&cmd),
            vec![
                "a/archive.cab".to_string(),
                "-F:products.xml".to_string(),
                Path::new("out").join("products.xml").display().to_string(),
            ]
        );
    }

    #[test]
    fn test_cabextract_extracts_into_output_dir() {
        let cmd = UnixCabextractExtractor.command(Path::new("a/archive.cab"), Path::new("out"));

        assert_eq!(cmd.as_std().get_program(), OsStr::new("cabextract"));
        assert_eq!(args(&cmd), vec!["-d", "out", "a/archive.cab"]);
    }

    #[test]
    fn test_select_extractor_follows_platform() {
        assert_eq!(select_extractor(ExtractorKind::Auto, || true).name(), "expand");
        assert_eq!(select_extractor(ExtractorKind::Auto, || false).name(), "cabextract");
        assert_eq!(select_extractor(ExtractorKind::Expand, || false).name(), "expand");
        assert_eq!(select_extractor(ExtractorKind::Cabextract, || true).name(), "cabextract");
    }
}
