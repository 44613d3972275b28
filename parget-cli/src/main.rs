//! parget CLI - segmented parallel downloader.
//!
//! This binary is a thin wrapper over the `parget` library: it parses flags
//! into a [`DownloadConfig`], probes the URL, then hands the run to the
//! orchestrator.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use url::Url;

use parget::config::{parse_header_line, DEFAULT_USER_AGENT};
use parget::probe::probe;
use parget::transfer::{DirectSource, SegmentSource, TunnelSource};
use parget::tunnel::TunnelDialer;
use parget::{orchestrator, DownloadConfig, DownloadJob, TunnelConfig};

/// Segmented, resumable parallel downloader with jump-host tunneling.
#[derive(Debug, Parser)]
#[command(name = "parget", version, about)]
struct Cli {
    /// URL to download
    url: String,

    /// Number of parallel segments
    #[arg(short = 'n', long = "segments", default_value_t = 10)]
    segments: u64,

    /// Jump host to tunnel through, as host:port
    #[arg(short = 'j', long = "jump-host")]
    jump_host: Option<String>,

    /// Shared secret for the jump host handshake
    #[arg(short = 'k', long = "jump-secret", requires = "jump_host")]
    jump_secret: Option<String>,

    /// Output file name (default: detect from the server or URL)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Cookie header value
    #[arg(short = 'c', long = "cookie")]
    cookie: Option<String>,

    /// Referrer header value (default: derived from the URL)
    #[arg(short = 'r', long = "referrer")]
    referrer: Option<String>,

    /// Content length override for servers that do not report one
    #[arg(short = 'l', long = "content-length")]
    content_length: Option<u64>,

    /// User agent string
    #[arg(long = "ua", default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Extra header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Suppress the progress display
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

impl Cli {
    fn into_config(self) -> DownloadConfig {
        let mut config = DownloadConfig::new(self.url);
        config.segments = self.segments;
        config.output = self.output;
        config.cookie = self.cookie;
        config.referrer = self.referrer;
        config.user_agent = self.user_agent;
        config.content_length = self.content_length;
        config.quiet = self.quiet;
        config.headers = self
            .headers
            .iter()
            .filter_map(|line| parse_header_line(line))
            .collect();
        if let Some(host) = self.jump_host {
            config.tunnel = Some(TunnelConfig {
                host,
                secret: self.jump_secret.unwrap_or_default(),
            });
        }
        config
    }
}

fn main() -> ExitCode {
    // clap's own exit path uses code 2 for usage errors; every failure of
    // this tool exits 1. Help and version go to stdout and exit 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let failed = err.use_stderr();
            let _ = err.print();
            return if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = cli.into_config();
    match run(&config) {
        Ok(output) => {
            if !config.quiet {
                println!("Done: {}", output.display());
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &DownloadConfig) -> parget::Result<PathBuf> {
    let info = probe(config)?;

    let output = config
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&info.file_name));
    let total_len = config.content_length.or(info.content_length);
    debug!(url = %info.final_url, output = %output.display(), ?total_len, "probe resolved");

    let source = build_source(&info.final_url, config)?;
    let job = DownloadJob {
        total_len,
        segments: config.segments,
        output: output.clone(),
    };
    orchestrator::run(&job, source, config.quiet)?;
    Ok(output)
}

fn build_source(url: &Url, config: &DownloadConfig) -> parget::Result<Arc<dyn SegmentSource>> {
    let source: Arc<dyn SegmentSource> = match &config.tunnel {
        Some(tunnel) => {
            let dialer = TunnelDialer::new(tunnel.host.clone(), tunnel.secret.clone());
            Arc::new(TunnelSource::new(url, dialer, config)?)
        }
        None => Arc::new(DirectSource::new(url.as_str(), config)?),
    };
    Ok(source)
}
