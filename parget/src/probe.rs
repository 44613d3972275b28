//! Pre-download metadata probe.
//!
//! Before any segment runs, a single GET asks the origin for the content
//! length, a possible redirect target, and a server-suggested file name.
//! The probe always dials the origin directly (no tunnel); it exchanges a
//! handful of header bytes and its body is dropped unread.

use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::DownloadConfig;
use crate::transfer::header_pairs;

/// Output name used when neither the server nor the URL yields one.
pub const FALLBACK_FILE_NAME: &str = "DOWNLOAD_NO_NAME";

/// Errors from the metadata probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

/// What the probe learned about the resource.
#[derive(Debug, Clone)]
pub struct ProbeInfo {
    /// URL the segments should fetch: the redirect target if the origin
    /// answered with one, otherwise the configured URL.
    pub final_url: Url,
    /// Reported content length, when present and positive.
    pub content_length: Option<u64>,
    /// File name from `Content-Disposition`, or derived from the URL path.
    pub file_name: String,
}

/// Probe the resource named by `config.url`.
///
/// Exactly one redirect hop is followed, by rewriting the URL rather than
/// re-requesting; mirror fan-out links are one level deep in practice. The
/// file name is always derived from the URL as given, not the redirect
/// target, so mirror-generated names do not leak into the output path.
pub fn probe(config: &DownloadConfig) -> Result<ProbeInfo, ProbeError> {
    let url = Url::parse(&config.url).map_err(|source| ProbeError::InvalidUrl {
        url: config.url.clone(),
        source,
    })?;

    let client = reqwest::blocking::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(true)
        .build()?;
    let mut request = client.get(url.as_str());
    for (name, value) in header_pairs(url.as_str(), config) {
        request = request.header(name, value);
    }
    let response = request.send()?;

    let content_length = response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|len| *len > 0);

    let final_url = match response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|value| value.to_str().ok())
    {
        Some(location) => match url.join(location) {
            Ok(target) => {
                debug!(%target, "following redirect");
                target
            }
            Err(err) => {
                warn!(location, error = %err, "ignoring unparseable redirect target");
                url.clone()
            }
        },
        None => url.clone(),
    };

    let disposition = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok());
    let file_name = derive_file_name(disposition, &config.url);

    debug!(?content_length, file_name, "probe complete");
    Ok(ProbeInfo {
        final_url,
        content_length,
        file_name,
    })
}

/// Pick an output file name from `Content-Disposition` or the URL path.
///
/// The header wins when it carries a `filename=` parameter. Otherwise the
/// last path component of the URL is used, with any query suffix stripped.
pub fn derive_file_name(content_disposition: Option<&str>, url: &str) -> String {
    let mut name = content_disposition
        .and_then(disposition_file_name)
        .unwrap_or_else(|| {
            url.rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string()
        });
    if let Some(cut) = name.find('?') {
        name.truncate(cut);
    }
    if name.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        name
    }
}

fn disposition_file_name(header: &str) -> Option<String> {
    let lower = header.to_lowercase();
    let at = lower.find("filename=")?;
    let raw = header[at + "filename=".len()..]
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches('"');
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Referrer sent when none is configured: the URL up to and including the
/// last slash of its path, or the URL itself when the path has no slash.
pub fn derive_referrer(url: &str) -> String {
    let path_start = url.find("//").map(|at| at + 2).unwrap_or(0);
    match url[path_start..].rfind('/') {
        Some(at) => url[..path_start + at + 1].to_string(),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_file_name_from_url() {
        assert_eq!(
            derive_file_name(None, "http://example.com/pub/archive.tar.gz"),
            "archive.tar.gz"
        );
    }

    #[test]
    fn test_derive_file_name_strips_query() {
        assert_eq!(
            derive_file_name(None, "http://example.com/file.iso?token=abc"),
            "file.iso"
        );
    }

    #[test]
    fn test_derive_file_name_prefers_disposition() {
        assert_eq!(
            derive_file_name(
                Some("attachment; filename=\"Report Final.pdf\""),
                "http://example.com/dl?id=9"
            ),
            "Report Final.pdf"
        );
    }

    #[test]
    fn test_derive_file_name_disposition_case_insensitive() {
        assert_eq!(
            derive_file_name(Some("attachment; FILENAME=Data.bin"), "http://x/y"),
            "Data.bin"
        );
    }

    #[test]
    fn test_derive_file_name_fallback() {
        assert_eq!(derive_file_name(None, "http://example.com/"), FALLBACK_FILE_NAME);
        assert_eq!(
            derive_file_name(Some("attachment"), "http://example.com/"),
            FALLBACK_FILE_NAME
        );
    }

    #[test]
    fn test_derive_referrer_directory() {
        assert_eq!(
            derive_referrer("http://example.com/a/b/file.bin"),
            "http://example.com/a/b/"
        );
    }

    #[test]
    fn test_derive_referrer_no_path() {
        assert_eq!(derive_referrer("http://example.com"), "http://example.com");
    }

    #[test]
    fn test_derive_referrer_root() {
        assert_eq!(
            derive_referrer("https://example.com/file"),
            "https://example.com/"
        );
    }
}
