//! Client-side WebSocket (RFC 6455) over a non-blocking mio transport.
//!
//! [`Connection`] is the protocol core: it owns the lifecycle, performs the
//! upgrade handshake and runs the frame codec, but does no I/O scheduling of
//! its own. [`EventLoop`] drives it over TCP or TLS.

pub mod config;
pub mod error;
pub mod net;

pub use config::ConnectConfig;
pub use error::{Result, WsError};
pub use net::event_loop::EventLoop;
pub use net::framing::{Frame, FrameError, Opcode, Payload};
pub use net::handshake::{HandshakeError, WsUrl};
pub use net::transport::{MioTransport, ReadOutcome, Transport};
pub use net::ws_client::{Connection, ErrorCode, ErrorEvent, Event, Message, ReadyState};
