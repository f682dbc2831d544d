use std::io;
use thiserror::Error;

use crate::net::framing::FrameError;
use crate::net::handshake::HandshakeError;
use crate::net::ws_client::ReadyState;

/// Errors returned synchronously by the public client API.
///
/// Failures that happen while the connection is running (transport errors,
/// handshake rejection, timeouts) are not returned here but delivered as
/// `Event::Error` followed by a close.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("websocket protocol must be ws or wss, got `{0}`")]
    UnsupportedScheme(String),

    #[error("invalid websocket url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("websocket url has no host")]
    MissingHost,

    #[error("cannot send msg that readyState != OPEN (state: {0:?})")]
    NotOpen(ReadyState),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, WsError>;
