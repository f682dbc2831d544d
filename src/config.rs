use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, WsError};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_MAX_HANDSHAKE_SIZE: usize = 8 * 1024;
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Per-connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectConfig {
    /// Deadline for the upgrade response, armed when the connection is created.
    pub connect_timeout: Duration,
    /// Check `Sec-WebSocket-Accept` against the key we sent.
    pub verify_accept: bool,
    /// Largest inbound payload accepted before the connection is failed.
    pub max_frame_size: usize,
    /// Largest handshake response buffered while waiting for `\r\n\r\n`.
    pub max_handshake_size: usize,
    pub read_buffer_size: usize,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            verify_accept: true,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_handshake_size: DEFAULT_MAX_HANDSHAKE_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl ConnectConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_verify_accept(mut self, verify: bool) -> Self {
        self.verify_accept = verify;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_max_handshake_size(mut self, size: usize) -> Self {
        self.max_handshake_size = size;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Loads `.env` (if any) and overrides defaults from
    /// `WS_CONNECT_TIMEOUT_SECS`, `WS_VERIFY_ACCEPT` and `WS_MAX_FRAME_BYTES`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "WS_CONNECT_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(WsError::Config("WS_CONNECT_TIMEOUT_SECS must be positive".into()));
            }
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(verify) = parse_var::<bool, _>(&lookup, "WS_VERIFY_ACCEPT")? {
            config.verify_accept = verify;
        }
        if let Some(max) = parse_var::<usize, _>(&lookup, "WS_MAX_FRAME_BYTES")? {
            config.max_frame_size = max;
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| WsError::Config(format!("invalid value for {key}: `{raw}`"))),
    }
}
