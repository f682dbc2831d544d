//! HTTP/1.1 upgrade handshake (RFC 6455 section 4).
//!
//! Request sent by the client:
//!
//! ```text
//! GET /chat HTTP/1.1
//! Host: example.com:8000
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! Expected response:
//!
//! ```text
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::digest;
use ring::rand::SecureRandom;
use thiserror::Error;
use url::{Host, Url};

use crate::error::WsError;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const ACCEPT_HEADER: &str = "sec-websocket-accept:";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("websocket handshake failed, {0}")]
    Rejected(String),

    #[error("websocket handshake failed, upgrade error.")]
    MissingUpgrade,

    #[error("websocket handshake failed, connection error.")]
    MissingConnection,

    #[error("websocket handshake failed, accept key mismatch (expected {expected}, got {actual:?})")]
    AcceptMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("websocket handshake failed, response header exceeds {0} bytes")]
    TooLarge(usize),

    #[error("failed to generate Sec-WebSocket-Key")]
    KeyGeneration,
}

/// Target of a connection, split out of a `ws://` or `wss://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    /// Host name or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
    /// Path plus query string, `/` if the URL has none.
    pub path: String,
    pub secure: bool,
}

impl WsUrl {
    pub fn parse(input: &str) -> Result<Self, WsError> {
        let url = Url::parse(input)?;

        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => return Err(WsError::UnsupportedScheme(other.to_string())),
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(WsError::MissingHost),
        };
        if host.is_empty() {
            return Err(WsError::MissingHost);
        }

        let port = url.port().unwrap_or(if secure { 443 } else { 80 });

        let mut path = url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            host,
            port,
            path,
            secure,
        })
    }

    /// `Host` header value. The port is always included.
    pub fn host_header(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Base64 of 16 random bytes, used as `Sec-WebSocket-Key`.
pub fn generate_key(rng: &dyn SecureRandom) -> Result<String, HandshakeError> {
    let mut nonce = [0u8; 16];
    rng.fill(&mut nonce).map_err(|_| HandshakeError::KeyGeneration)?;
    Ok(STANDARD.encode(nonce))
}

/// base64(SHA-1(key ++ GUID)), the value a compliant server echoes back.
pub fn compute_accept_key(key: &str) -> String {
    let mut ctx = digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);
    ctx.update(key.as_bytes());
    ctx.update(WS_GUID.as_bytes());
    STANDARD.encode(ctx.finish().as_ref())
}

pub fn build_request(url: &WsUrl, key: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        url.path,
        url.host_header(),
        key
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Header block terminated; bytes from `header_len` on belong to the
    /// framed stream.
    Complete { header_len: usize },
    /// No empty line yet, keep buffering.
    Partial,
}

/// Scans the response line by line.
///
/// A status line mentioning `http/1.1` without `101` fails immediately, even
/// if the header block is not finished. Otherwise both the upgrade and the
/// connection signals must be present once the empty line is reached. When
/// `expected_accept` is given, `Sec-WebSocket-Accept` must match it exactly.
pub fn validate_response(
    buf: &[u8],
    expected_accept: Option<&str>,
    max_size: usize,
) -> Result<HandshakeStatus, HandshakeError> {
    ResponseScanner::new().scan(buf, expected_accept, max_size)
}

/// Incremental form of [`validate_response`] for a response that arrives
/// over several reads.
///
/// `scan` is called with the whole buffer so far each time; lines already
/// seen are not looked at again.
#[derive(Debug, Default)]
pub struct ResponseScanner {
    line_start: usize,
    upgrade: bool,
    connection: bool,
    accept: Option<String>,
}

impl ResponseScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the first line not fully scanned yet.
    pub fn scanned(&self) -> usize {
        self.line_start
    }

    /// `buf` must extend the buffer passed to the previous call.
    pub fn scan(
        &mut self,
        buf: &[u8],
        expected_accept: Option<&str>,
        max_size: usize,
    ) -> Result<HandshakeStatus, HandshakeError> {
        let mut header_len = None;

        let mut i = self.line_start;
        while i + 1 < buf.len() {
            if buf[i] != b'\r' || buf[i + 1] != b'\n' {
                i += 1;
                continue;
            }

            let line = &buf[self.line_start..i];
            if line.is_empty() {
                header_len = Some(i + 2);
                break;
            }
            self.scan_line(line)?;

            i += 2;
            self.line_start = i;
        }

        let header_len = match header_len {
            Some(len) => len,
            None if buf.len() > max_size => return Err(HandshakeError::TooLarge(max_size)),
            None => return Ok(HandshakeStatus::Partial),
        };

        if !self.upgrade {
            return Err(HandshakeError::MissingUpgrade);
        }
        if !self.connection {
            return Err(HandshakeError::MissingConnection);
        }

        if let Some(expected) = expected_accept {
            if self.accept.as_deref() != Some(expected) {
                return Err(HandshakeError::AcceptMismatch {
                    expected: expected.to_string(),
                    actual: self.accept.clone(),
                });
            }
        }

        Ok(HandshakeStatus::Complete { header_len })
    }

    fn scan_line(&mut self, line: &[u8]) -> Result<(), HandshakeError> {
        let text = String::from_utf8_lossy(line);
        let lower = text.to_ascii_lowercase();
        if lower.contains("http/1.1") && !lower.contains("101") {
            return Err(HandshakeError::Rejected(text.trim().to_string()));
        }
        if lower.contains("upgrade") && lower.contains("websocket") {
            self.upgrade = true;
        }
        if lower.contains("connection") && lower.contains("upgrade") {
            self.connection = true;
        }
        if lower.starts_with(ACCEPT_HEADER) {
            self.accept = Some(text[ACCEPT_HEADER.len()..].trim().to_string());
        }
        Ok(())
    }
}
