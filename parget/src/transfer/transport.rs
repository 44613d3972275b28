//! Byte-stream sources for segment workers.
//!
//! [`SegmentSource`] is the seam between the copy worker and the network:
//! direct transfers go through [`DirectSource`] (a shared `reqwest` client),
//! tunneled transfers through [`TunnelSource`] (a hand-rolled HTTP/1.1
//! request over the relayed socket, since the jump host hands us a raw TCP
//! stream no HTTP client can be pointed at). `https` destinations get a
//! `rustls` session with certificate verification disabled layered over the
//! relayed stream. Tests substitute an in-memory source.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme, StreamOwned};
use tracing::debug;
use url::Url;

use crate::config::DownloadConfig;
use crate::probe::derive_referrer;
use crate::tunnel::TunnelDialer;

use super::TransferError;

/// Opens one response body stream per call.
///
/// `range` is the inclusive byte range to request; `None` asks for the whole
/// resource. Implementations must be shareable across worker threads.
pub trait SegmentSource: Send + Sync {
    fn open(&self, range: Option<(u64, u64)>) -> Result<Box<dyn Read + Send>, TransferError>;
}

/// Request headers for segment and probe requests, in send order.
///
/// Always includes `User-Agent` and `Referer`; the referrer falls back to the
/// URL's own directory when none is configured, since some origins refuse
/// range requests without one.
pub fn header_pairs(url: &str, config: &DownloadConfig) -> Vec<(String, String)> {
    let mut pairs = vec![
        ("User-Agent".to_string(), config.user_agent.clone()),
        (
            "Referer".to_string(),
            config
                .referrer
                .clone()
                .unwrap_or_else(|| derive_referrer(url)),
        ),
    ];
    if let Some(cookie) = &config.cookie {
        pairs.push(("Cookie".to_string(), cookie.clone()));
    }
    pairs.extend(config.headers.iter().cloned());
    pairs
}

/// Direct origin connection via a shared blocking HTTP client.
///
/// Certificate validation is disabled: the tool targets ad-hoc mirrors and
/// lab hosts with self-signed certificates, and the payload is integrity-
/// checked by the caller, not the transport.
pub struct DirectSource {
    client: reqwest::blocking::Client,
    url: String,
    headers: Vec<(String, String)>,
}

impl DirectSource {
    pub fn new(url: &str, config: &DownloadConfig) -> Result<Self, TransferError> {
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            headers: header_pairs(url, config),
        })
    }
}

impl SegmentSource for DirectSource {
    fn open(&self, range: Option<(u64, u64)>) -> Result<Box<dyn Read + Send>, TransferError> {
        let mut request = self.client.get(&self.url);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some((start, end)) = range {
            request = request.header("Range", format!("bytes={start}-{end}"));
        }
        let response = request.send()?;
        let status = response.status().as_u16();
        if status != 200 && status != 206 {
            return Err(TransferError::UnexpectedStatus(status));
        }
        debug!(url = %self.url, ?range, status, "segment stream opened");
        Ok(Box::new(response))
    }
}

/// Origin connection relayed through a jump host.
///
/// Speaks just enough HTTP/1.1 to issue one `GET` with `Connection: close`
/// and strip the response head; a `Transfer-Encoding: chunked` body is
/// decoded, anything else is read straight off the socket until the origin
/// closes it. For `https` URLs the relayed stream is wrapped in a TLS
/// session first, with verification disabled to match [`DirectSource`].
pub struct TunnelSource {
    dialer: TunnelDialer,
    destination: String,
    host_header: String,
    target: String,
    headers: Vec<(String, String)>,
    tls: Option<Arc<ClientConfig>>,
}

impl TunnelSource {
    pub fn new(
        url: &Url,
        dialer: TunnelDialer,
        config: &DownloadConfig,
    ) -> Result<Self, TransferError> {
        let tls = match url.scheme() {
            "http" => None,
            "https" => Some(Arc::new(insecure_tls_config()?)),
            other => {
                return Err(TransferError::Protocol(format!(
                    "cannot tunnel {other} URLs through a jump host, only http and https"
                )))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| TransferError::Protocol(format!("URL {url} has no host")))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }
        Ok(Self {
            dialer,
            destination: format!("{host}:{port}"),
            host_header: host.to_string(),
            target,
            headers: header_pairs(url.as_str(), config),
            tls,
        })
    }

    fn request<S: Read + Write + Send + 'static>(
        &self,
        mut stream: S,
        range: Option<(u64, u64)>,
    ) -> Result<Box<dyn Read + Send>, TransferError> {
        let mut request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\n",
            self.target, self.host_header
        );
        for (name, value) in &self.headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        if let Some((start, end)) = range {
            request.push_str(&format!("Range: bytes={start}-{end}\r\n"));
        }
        request.push_str("Connection: close\r\n\r\n");
        stream.write_all(request.as_bytes())?;

        let mut reader = BufReader::new(stream);
        let status = read_status_line(&mut reader)?;
        if status != 200 && status != 206 {
            return Err(TransferError::UnexpectedStatus(status));
        }
        let headers = read_headers(&mut reader)?;
        debug!(destination = %self.destination, ?range, status, "tunneled stream opened");
        if is_chunked(&headers) {
            Ok(Box::new(ChunkedReader::new(reader)))
        } else {
            Ok(Box::new(reader))
        }
    }
}

impl SegmentSource for TunnelSource {
    fn open(&self, range: Option<(u64, u64)>) -> Result<Box<dyn Read + Send>, TransferError> {
        let stream = self.dialer.dial(&self.destination)?;
        match &self.tls {
            Some(config) => {
                let name = ServerName::try_from(self.host_header.clone()).map_err(|_| {
                    TransferError::Protocol(format!(
                        "{} is not a valid TLS server name",
                        self.host_header
                    ))
                })?;
                let conn = ClientConnection::new(Arc::clone(config), name).map_err(|err| {
                    TransferError::Protocol(format!("TLS session setup failed: {err}"))
                })?;
                self.request(StreamOwned::new(conn, stream), range)
            }
            None => self.request(stream, range),
        }
    }
}

/// TLS client configuration that accepts any server certificate.
fn insecure_tls_config() -> Result<ClientConfig, TransferError> {
    let provider = ring::default_provider();
    let config = ClientConfig::builder_with_provider(Arc::new(provider.clone()))
        .with_safe_default_protocol_versions()
        .map_err(|err| TransferError::Protocol(format!("TLS configuration failed: {err}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier(provider)))
        .with_no_client_auth();
    Ok(config)
}

/// Accepts every certificate; signatures are still checked so a broken
/// handshake fails instead of silently feeding garbage.
#[derive(Debug)]
struct InsecureVerifier(CryptoProvider);

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Parse the status code out of an HTTP/1.x status line.
fn read_status_line<R: BufRead>(reader: &mut R) -> Result<u16, TransferError> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let code = line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            TransferError::Protocol(format!("malformed status line {:?}", line.trim_end()))
        })?;
    Ok(code)
}

/// Consume response headers up to and including the blank line.
fn read_headers<R: BufRead>(reader: &mut R) -> Result<Vec<String>, TransferError> {
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(TransferError::Protocol(
                "connection closed before end of response headers".to_string(),
            ));
        }
        if line == "\r\n" || line == "\n" {
            return Ok(headers);
        }
        headers.push(line.trim_end().to_string());
    }
}

fn is_chunked(headers: &[String]) -> bool {
    headers.iter().any(|line| {
        let lower = line.to_lowercase();
        lower.starts_with("transfer-encoding:") && lower.contains("chunked")
    })
}

/// Decoder for a `Transfer-Encoding: chunked` response body.
///
/// Yields only chunk payload bytes; size lines, chunk separators and
/// trailers never reach the caller. EOF inside a chunk is an error, since a
/// chunked body always announces its own end with a zero-size chunk.
struct ChunkedReader<R> {
    inner: R,
    remaining: u64,
    at_first_chunk: bool,
    done: bool,
}

impl<R: BufRead> ChunkedReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: 0,
            at_first_chunk: true,
            done: false,
        }
    }

    fn next_chunk(&mut self) -> io::Result<()> {
        if !self.at_first_chunk {
            let separator = self.read_line()?;
            if !separator.is_empty() {
                return Err(invalid_chunk("missing separator after chunk"));
            }
        }
        self.at_first_chunk = false;

        let line = self.read_line()?;
        // Chunk extensions after ';' are allowed and ignored.
        let size_text = line.split(';').next().unwrap_or_default().trim();
        let size = u64::from_str_radix(size_text, 16)
            .map_err(|_| invalid_chunk("malformed chunk size line"))?;
        if size == 0 {
            // Discard trailers up to the final blank line.
            while !self.read_line()?.is_empty() {}
            self.done = true;
        } else {
            self.remaining = size;
        }
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        if self.inner.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside chunked body",
            ));
        }
        Ok(line.trim_end().to_string())
    }
}

fn invalid_chunk(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

impl<R: BufRead> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.done {
            return Ok(0);
        }
        if self.remaining == 0 {
            self.next_chunk()?;
            if self.done {
                return Ok(0);
            }
        }
        let take = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let read = self.inner.read(&mut buf[..take])?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside chunked body",
            ));
        }
        self.remaining -= read as u64;
        Ok(read)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::frame::{read_frame, write_frame, write_status};
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_header_pairs_defaults() {
        let config = DownloadConfig::new("http://example.com/dir/file.bin");
        let pairs = header_pairs("http://example.com/dir/file.bin", &config);
        assert_eq!(
            pairs,
            vec![
                ("User-Agent".to_string(), "curl/7.64.1".to_string()),
                ("Referer".to_string(), "http://example.com/dir/".to_string()),
            ]
        );
    }

    #[test]
    fn test_header_pairs_full_config() {
        let mut config = DownloadConfig::new("http://example.com/file");
        config.referrer = Some("http://other.example/".to_string());
        config.cookie = Some("session=abc".to_string());
        config
            .headers
            .push(("X-Token".to_string(), "t".to_string()));
        let pairs = header_pairs("http://example.com/file", &config);
        assert_eq!(pairs[1].1, "http://other.example/");
        assert_eq!(pairs[2], ("Cookie".to_string(), "session=abc".to_string()));
        assert_eq!(pairs[3], ("X-Token".to_string(), "t".to_string()));
    }

    #[test]
    fn test_read_status_line() {
        let mut reader = Cursor::new(b"HTTP/1.1 206 Partial Content\r\n".to_vec());
        assert_eq!(read_status_line(&mut reader).unwrap(), 206);
    }

    #[test]
    fn test_read_status_line_malformed() {
        let mut reader = Cursor::new(b"garbage\r\n".to_vec());
        match read_status_line(&mut reader) {
            Err(TransferError::Protocol(msg)) => assert!(msg.contains("garbage")),
            other => panic!("expected Protocol error, got {other:?}"),
        }
    }

    #[test]
    fn test_read_headers_stops_at_blank_line() {
        let mut reader = Cursor::new(
            b"Content-Length: 4\r\nContent-Type: text/plain\r\n\r\nbody".to_vec(),
        );
        let headers = read_headers(&mut reader).unwrap();
        assert_eq!(headers.len(), 2);
        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "body");
    }

    #[test]
    fn test_read_headers_truncated_response() {
        let mut reader = Cursor::new(b"Content-Length: 4\r\n".to_vec());
        assert!(read_headers(&mut reader).is_err());
    }

    #[test]
    fn test_is_chunked_case_insensitive() {
        assert!(is_chunked(&["Transfer-Encoding: chunked".to_string()]));
        assert!(is_chunked(&["TRANSFER-ENCODING: Chunked".to_string()]));
        assert!(!is_chunked(&["Content-Length: 5".to_string()]));
        assert!(!is_chunked(&["Transfer-Encoding: identity".to_string()]));
    }

    #[test]
    fn test_chunked_reader_single_chunk() {
        let mut reader = ChunkedReader::new(Cursor::new(b"5\r\nhello\r\n0\r\n\r\n".to_vec()));
        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "hello");
    }

    #[test]
    fn test_chunked_reader_multiple_chunks_and_extension() {
        let mut reader = ChunkedReader::new(Cursor::new(
            b"4;ext=1\r\nwiki\r\n5\r\npedia\r\n0\r\n\r\n".to_vec(),
        ));
        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "wikipedia");
    }

    #[test]
    fn test_chunked_reader_discards_trailers() {
        let mut reader = ChunkedReader::new(Cursor::new(
            b"3\r\nabc\r\n0\r\nX-Checksum: 99\r\n\r\n".to_vec(),
        ));
        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "abc");
    }

    #[test]
    fn test_chunked_reader_truncated_body() {
        let mut reader = ChunkedReader::new(Cursor::new(b"10\r\nshort".to_vec()));
        let mut body = Vec::new();
        let err = reader.read_to_end(&mut body).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_chunked_reader_malformed_size() {
        let mut reader = ChunkedReader::new(Cursor::new(b"zz\r\ndata\r\n".to_vec()));
        let mut body = Vec::new();
        let err = reader.read_to_end(&mut body).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_tunnel_source_rejects_unknown_scheme() {
        let url = Url::parse("ftp://example.com/file").unwrap();
        let config = DownloadConfig::new(url.as_str());
        let dialer = TunnelDialer::new("127.0.0.1:1", "secret");
        match TunnelSource::new(&url, dialer, &config) {
            Err(TransferError::Protocol(msg)) => assert!(msg.contains("ftp")),
            other => panic!("expected Protocol error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_tunnel_source_accepts_https() {
        let url = Url::parse("https://example.com/file").unwrap();
        let config = DownloadConfig::new(url.as_str());
        let dialer = TunnelDialer::new("127.0.0.1:1", "secret");
        let source = TunnelSource::new(&url, dialer, &config).unwrap();
        assert_eq!(source.destination, "example.com:443");
        assert!(source.tls.is_some());
    }

    #[test]
    fn test_tunnel_source_target_keeps_query() {
        let url = Url::parse("http://example.com:8080/a/b?x=1").unwrap();
        let config = DownloadConfig::new(url.as_str());
        let dialer = TunnelDialer::new("127.0.0.1:1", "secret");
        let source = TunnelSource::new(&url, dialer, &config).unwrap();
        assert_eq!(source.destination, "example.com:8080");
        assert_eq!(source.target, "/a/b?x=1");
        assert_eq!(source.host_header, "example.com");
        assert!(source.tls.is_none());
    }

    /// Jump host that accepts any handshake, then serves `response` to the
    /// first HTTP request on the relayed stream.
    fn serving_jump_host(response: &'static [u8]) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            write_frame(&mut stream, b"challenge").unwrap();
            read_frame(&mut stream).unwrap();
            write_status(&mut stream, 0).unwrap();
            read_frame(&mut stream).unwrap();
            write_status(&mut stream, 0).unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" {
                    break;
                }
            }
            stream.write_all(response).unwrap();
        });
        (addr, handle)
    }

    #[test]
    fn test_tunnel_source_decodes_chunked_body() {
        let (addr, host) = serving_jump_host(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        );
        let url = Url::parse("http://origin.example/file").unwrap();
        let config = DownloadConfig::new(url.as_str());
        let source = TunnelSource::new(&url, TunnelDialer::new(addr, "secret"), &config).unwrap();

        let mut body = String::new();
        source
            .open(None)
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "hello");
        host.join().unwrap();
    }

    #[test]
    fn test_tunnel_source_plain_body_reads_to_eof() {
        let (addr, host) =
            serving_jump_host(b"HTTP/1.1 206 Partial Content\r\nContent-Length: 5\r\n\r\nhello");
        let url = Url::parse("http://origin.example/file").unwrap();
        let config = DownloadConfig::new(url.as_str());
        let source = TunnelSource::new(&url, TunnelDialer::new(addr, "secret"), &config).unwrap();

        let mut body = String::new();
        source
            .open(Some((0, 4)))
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "hello");
        host.join().unwrap();
    }
}
