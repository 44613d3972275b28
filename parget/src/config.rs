//! Run configuration.
//!
//! A download run is described by a single immutable [`DownloadConfig`] value
//! constructed up front (typically by the CLI) and passed by reference into
//! every component. No component reads ambient global state.

use std::path::PathBuf;

/// User agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = "curl/7.64.1";

/// Jump-host tunnel settings.
///
/// When present, every segment connection is routed through the jump host
/// using the challenge-response protocol in [`crate::tunnel`].
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Jump host address as `host:port`.
    pub host: String,
    /// Shared secret proven during the handshake.
    pub secret: String,
}

/// Immutable configuration for one download run.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Source URL as given by the user (before redirect resolution).
    pub url: String,
    /// Requested segment count. The planner may reduce this for small files.
    pub segments: u64,
    /// Output path override; `None` means auto-detect via the probe.
    pub output: Option<PathBuf>,
    /// Value for the `Cookie` header, if any.
    pub cookie: Option<String>,
    /// Referrer override; when absent the referrer is derived from the URL.
    pub referrer: Option<String>,
    /// Value for the `User-Agent` header.
    pub user_agent: String,
    /// Additional `name: value` header pairs.
    pub headers: Vec<(String, String)>,
    /// Content length override for servers that do not report one.
    pub content_length: Option<u64>,
    /// Tunnel settings; `None` dials the origin directly.
    pub tunnel: Option<TunnelConfig>,
    /// Suppress the console progress line.
    pub quiet: bool,
}

impl DownloadConfig {
    /// Configuration with defaults matching the CLI's defaults.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            segments: 10,
            output: None,
            cookie: None,
            referrer: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: Vec::new(),
            content_length: None,
            tunnel: None,
            quiet: false,
        }
    }
}

/// Parse one `Name: value` header line.
///
/// Returns `None` when the line has no colon or either side is empty after
/// trimming; malformed header flags are ignored rather than rejected.
pub fn parse_header_line(line: &str) -> Option<(String, String)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    let value = value.trim();
    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = DownloadConfig::new("http://example.com/file");
        assert_eq!(config.segments, 10);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert!(config.tunnel.is_none());
        assert!(!config.quiet);
    }

    #[test]
    fn test_parse_header_line() {
        assert_eq!(
            parse_header_line("X-Token: abc123"),
            Some(("X-Token".to_string(), "abc123".to_string()))
        );
        assert_eq!(
            parse_header_line("Accept:  text/plain "),
            Some(("Accept".to_string(), "text/plain".to_string()))
        );
    }

    #[test]
    fn test_parse_header_line_keeps_colons_in_value() {
        assert_eq!(
            parse_header_line("Referer: http://example.com/a"),
            Some(("Referer".to_string(), "http://example.com/a".to_string()))
        );
    }

    #[test]
    fn test_parse_header_line_rejects_malformed() {
        assert_eq!(parse_header_line("no-colon-here"), None);
        assert_eq!(parse_header_line(": value"), None);
        assert_eq!(parse_header_line("name:"), None);
        assert_eq!(parse_header_line("name:   "), None);
    }
}
