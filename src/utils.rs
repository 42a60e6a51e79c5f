use sha2::{Digest, Sha256};
use std::path::PathBuf;
use url::Url;

/// Number of trailing URL path segments that make up a work directory name.
const SUFFIX_SEGMENTS: usize = 5;

/// Expands a leading `~` in a user-supplied path.
///
/// # Examples
/// ```rust
/// use cabwatch::utils::expand_path;
///
/// assert_eq!(expand_path("products"), std::path::PathBuf::from("products"));
/// ```
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Derives a filesystem-safe directory name from an archive URL.
///
/// The last five non-empty path segments are joined with `_`, a trailing `.cab`
/// is dropped, and every character outside `[A-Za-z0-9._-]` becomes `_`. URLs
/// without a usable path fall back to their host name.
///
/// When the URL carries a query, or sanitizing changed the name, a short digest of
/// the full URL is appended, so two distinct URLs never share a directory because
/// of it.
///
/// # Errors
///
/// Returns an error if `url` is not an absolute URL.
///
/// # Examples
/// ```rust
/// use cabwatch::utils::path_suffix;
///
/// let url = "http://download.windowsupdate.com/c/msdownload/update/software/updt/2024/01/products_202401.cab";
/// assert_eq!(path_suffix(url).unwrap(), "software_updt_2024_01_products_202401");
///
/// let a = path_suffix("https://example.com/files/products.cab?P1=1").unwrap();
/// let b = path_suffix("https://example.com/files/products.cab?P1=2").unwrap();
/// assert!(a.starts_with("files_products_"));
/// assert_ne!(a, b);
/// ```
pub fn path_suffix(url: &str) -> Result<String, url::ParseError> {
    let parsed = Url::parse(url)?;

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let start = segments.len().saturating_sub(SUFFIX_SEGMENTS);
    let joined = segments[start..].join("_");
    let mut raw = joined.strip_suffix(".cab").unwrap_or(&joined).to_string();
    if raw.is_empty() {
        raw = parsed.host_str().unwrap_or_default().to_string();
    }

    let token = sanitize_token(&raw);
    let ambiguous = token != raw || parsed.query().is_some();

    let token = if token.is_empty() {
        String::from("root")
    } else {
        token
    };
    if ambiguous {
        Ok(format!("{}_{}", token, url_digest(url)))
    } else {
        Ok(token)
    }
}

/// First eight hex digits of the SHA-256 of `url`.
fn url_digest(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(&digest[..4])
}

/// Replaces every character that is unsafe in a directory name with `_`.
/// A token made only of dots is rejected as empty.
pub fn sanitize_token(value: &str) -> String {
    let token: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if token.chars().all(|c| c == '.') {
        String::new()
    } else {
        token
    }
}
