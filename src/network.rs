use crate::options::Settings;
use futures::StreamExt;
use reqwest::header::{CONNECTION, HeaderMap, HeaderValue, LOCATION, USER_AGENT};
use std::error::Error;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};
use url::Url;

/// Size of the write buffer used while streaming an archive to disk.
pub const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to write archive: {0}")]
    Io(#[from] io::Error),
}

/// The headers every request carries. Windows Update endpoints reject generic clients.
fn default_headers(user_agent: &str) -> Result<HeaderMap, Box<dyn Error>> {
    let mut headers = HeaderMap::new();
    headers.insert(CONNECTION, HeaderValue::from_static("Keep-Alive"));
    headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
    Ok(headers)
}

/// Builds the client used to resolve redirect links.
///
/// Redirects are never followed so the `Location` header of the first response
/// can be read.
///
/// # Arguments
///
/// * `settings` - The run settings providing the user agent and probe timeout.
///
/// # Returns
///
/// A `Result` containing the built `Client` if successful, or an error otherwise.
pub fn build_probe_client(settings: &Settings) -> Result<reqwest::Client, Box<dyn Error>> {
    Ok(reqwest::Client::builder()
        .default_headers(default_headers(&settings.user_agent)?)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(settings.probe_timeout)
        .build()?)
}

/// Builds the client used to download archives and to call the web archive.
///
/// The download timeout applies to connecting and to every read, not to the whole
/// transfer, so large archives on a slow link still complete.
pub fn build_download_client(settings: &Settings) -> Result<reqwest::Client, Box<dyn Error>> {
    Ok(reqwest::Client::builder()
        .default_headers(default_headers(&settings.user_agent)?)
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(settings.download_timeout)
        .read_timeout(settings.download_timeout)
        .build()?)
}

/// Sends a `HEAD` request to `url` and returns its redirect target.
///
/// # Arguments
///
/// * `url` - The redirect origin to probe.
/// * `client` - A client built with [`build_probe_client`].
/// * `timeout` - Upper bound for the whole request.
///
/// # Returns
///
/// `Ok(Some(target))` when the response carries a `Location` header, `Ok(None)` when
/// it doesn't. A relative target is resolved against `url`.
///
/// # Errors
///
/// Returns the `reqwest::Error` if the request could not be completed.
pub async fn probe_redirect(
    url: &str,
    client: &reqwest::Client,
    timeout: Duration,
) -> Result<Option<String>, reqwest::Error> {
    let response = client.head(url).timeout(timeout).send().await?;

    let Some(location) = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };

    let target = match Url::parse(location) {
        Ok(_) => location.to_string(),
        Err(url::ParseError::RelativeUrlWithoutBase) => response
            .url()
            .join(location)
            .map(String::from)
            .unwrap_or_else(|_| location.to_string()),
        Err(_) => location.to_string(),
    };
    Ok(Some(target))
}

/// Streams the body of `url` into `output_path`.
///
/// The body is written through a fixed-size buffer, so memory use does not depend on
/// the archive size. Errors are logged with the offending URL and never returned; a
/// partially written file is removed.
///
/// # Arguments
///
/// * `url` - The archive URL.
/// * `output_path` - Where to store the archive. An existing file is overwritten.
/// * `client` - A client built with [`build_download_client`].
///
/// # Returns
///
/// `true` if the whole body was written to disk.
pub async fn download_archive(url: &str, output_path: &Path, client: &reqwest::Client) -> bool {
    info!("Downloading CAB from: {}", url);

    match stream_to_file(url, output_path, client).await {
        Ok(written) => {
            debug!("Wrote {} bytes to {}", written, output_path.display());
            true
        }
        Err(e) => {
            warn!("Error downloading {}: {}", url, e);
            match tokio::fs::remove_file(output_path).await {
                Ok(()) => debug!("Removed partial download {}", output_path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => (),
                Err(e) => warn!(
                    "Failed to remove partial download {}: {}",
                    output_path.display(),
                    e
                ),
            }
            false
        }
    }
}

async fn stream_to_file(
    url: &str,
    output_path: &Path,
    client: &reqwest::Client,
) -> Result<u64, DownloadError> {
    let response = client.get(url).send().await?.error_for_status()?;

    let file = File::create(output_path).await?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
    let mut written = 0u64;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    writer.flush().await?;

    Ok(written)
}

/// Asks the web archive to take a snapshot of `url`.
///
/// Failures are logged only. Returns `true` if the archive accepted the request.
pub async fn archive_snapshot(
    endpoint: &str,
    url: &str,
    client: &reqwest::Client,
    timeout: Duration,
) -> bool {
    info!("Archiving to Wayback: {}", url);

    let result = client
        .get(format!("{}{}", endpoint, url))
        .timeout(timeout)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status);

    match result {
        Ok(_) => true,
        Err(e) => {
            warn!("Failed to archive {} to the web archive: {}", url, e);
            false
        }
    }
}
