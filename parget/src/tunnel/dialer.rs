//! Client side of the jump-host handshake.

use std::net::{Shutdown, TcpStream};

use sha1::{Digest, Sha1};
use tracing::debug;

use super::frame::{read_frame, read_status, write_frame};
use super::TunnelError;

/// Dials destinations through a jump host.
///
/// Each [`dial`](TunnelDialer::dial) opens a fresh connection and runs the
/// full handshake; the returned stream is ready for raw relaying.
#[derive(Debug, Clone)]
pub struct TunnelDialer {
    host: String,
    secret: String,
}

/// Proof of secret knowledge: `SHA1(challenge || secret)`.
///
/// The digest binds the response to this connection's challenge, so a
/// captured response is useless against any other connection.
pub fn challenge_response(challenge: &[u8], secret: &str) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(challenge);
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

impl TunnelDialer {
    /// `host` is the jump host as `host:port`.
    pub fn new(host: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            secret: secret.into(),
        }
    }

    /// Open a relayed connection to `destination` (`host:port`).
    ///
    /// On any handshake failure the connection is shut down before the error
    /// is returned; a half-finished handshake is never handed to the caller.
    pub fn dial(&self, destination: &str) -> Result<TcpStream, TunnelError> {
        let mut stream = TcpStream::connect(&self.host)?;
        match self.handshake(&mut stream, destination) {
            Ok(()) => {
                debug!(jump_host = %self.host, %destination, "tunnel established");
                Ok(stream)
            }
            Err(err) => {
                let _ = stream.shutdown(Shutdown::Both);
                Err(err)
            }
        }
    }

    fn handshake(&self, stream: &mut TcpStream, destination: &str) -> Result<(), TunnelError> {
        let challenge = read_frame(stream)?;
        write_frame(stream, &challenge_response(&challenge, &self.secret))?;
        if read_status(stream)? != 0 {
            let reason = read_frame(stream)?;
            return Err(TunnelError::AuthRejected(
                String::from_utf8_lossy(&reason).into_owned(),
            ));
        }

        write_frame(stream, destination.as_bytes())?;
        if read_status(stream)? != 0 {
            let reason = read_frame(stream)?;
            return Err(TunnelError::ConnectRejected {
                destination: destination.to_string(),
                reason: String::from_utf8_lossy(&reason).into_owned(),
            });
        }
        Ok(())
    }
}
