// ivr-net/src/validation.rs
use ivr_common::error::{IvrError, Result};
use tracing::warn;
use url::Url;

/// Parses a repository base URL. Only http and https are accepted; plain http
/// is allowed for local mirrors but logged. The result always ends in `/` so
/// relative joins append instead of replacing the last segment.
pub fn validate_url(url_str: &str) -> Result<Url> {
    let mut url = Url::parse(url_str)
        .map_err(|e| IvrError::Config(format!("Failed to parse URL '{url_str}': {e}")))?;
    match url.scheme() {
        "https" => {}
        "http" => warn!("Repository '{}' is not using https", url_str),
        other => {
            return Err(IvrError::Config(format!(
                "Invalid URL scheme for '{url_str}': must be http or https, but got '{other}'"
            )))
        }
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// True when a repository string should be treated as a URL rather than a
/// filesystem path.
pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}
