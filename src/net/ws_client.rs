use std::collections::VecDeque;
use std::io;
use std::time::Instant;

use log::{debug, error, info, warn};
use ring::rand::SystemRandom;

use crate::config::ConnectConfig;
use crate::error::{Result, WsError};
use crate::net::framing::{
    encode_frame, encode_with_key, generate_mask_key, Frame, FrameBuffer, FrameOptions, Opcode, Payload,
};
use crate::net::handshake::{self, HandshakeStatus, ResponseScanner, WsUrl};
use crate::net::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    /// Transport failure, EOF, timeout or a framing violation.
    Normal = 1000,
    /// The server did not accept the upgrade.
    HandshakeFailed = 1010,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

/// Notifications, in the order they happened. `Close` fires at most once and
/// only for a connection that reached `Open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open,
    Message(Message),
    Close,
    Error(ErrorEvent),
}

/// Client side of one WebSocket connection.
///
/// The connection never blocks and never reads by itself: the owner of the
/// event loop reports connect completion, inbound bytes, I/O errors and clock
/// ticks, and drains the resulting `Event`s.
pub struct Connection<T: Transport> {
    url: WsUrl,
    config: ConnectConfig,
    transport: T,
    rng: SystemRandom,
    state: ReadyState,
    handshake_complete: bool,
    handshake_key: String,
    expected_accept: Option<String>,
    handshake_buf: Vec<u8>,
    handshake_scan: ResponseScanner,
    connect_deadline: Option<Instant>,
    inbound: FrameBuffer,
    events: VecDeque<Event>,
}

impl<T: Transport> Connection<T> {
    /// Parses `url`, arms the connect timeout and asks the transport to connect.
    ///
    /// Only configuration problems (bad URL or scheme) are returned as errors;
    /// a transport that fails to start connecting is reported as an
    /// `Event::Error` on the returned connection.
    pub fn connect(url: &str, config: ConnectConfig, transport: T) -> Result<Self> {
        Self::connect_at(url, config, transport, Instant::now())
    }

    pub fn connect_at(url: &str, config: ConnectConfig, transport: T, now: Instant) -> Result<Self> {
        let url = WsUrl::parse(url).map_err(|e| {
            error!("{}", e);
            e
        })?;

        let rng = SystemRandom::new();
        let handshake_key = handshake::generate_key(&rng)?;
        let expected_accept = config
            .verify_accept
            .then(|| handshake::compute_accept_key(&handshake_key));

        let mut conn = Self {
            connect_deadline: Some(now + config.connect_timeout),
            inbound: FrameBuffer::new(config.max_frame_size),
            url,
            config,
            transport,
            rng,
            state: ReadyState::Connecting,
            handshake_complete: false,
            handshake_key,
            expected_accept,
            handshake_buf: Vec::new(),
            handshake_scan: ResponseScanner::new(),
            events: VecDeque::new(),
        };

        let (host, port, secure) = (conn.url.host.clone(), conn.url.port, conn.url.secure);
        if let Err(e) = conn.transport.connect(&host, port, secure) {
            conn.fail(ErrorCode::Normal, e.to_string());
        }
        Ok(conn)
    }

    pub fn state(&self) -> ReadyState {
        self.state
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    pub fn handshake_key(&self) -> &str {
        &self.handshake_key
    }

    pub fn url(&self) -> &WsUrl {
        &self.url
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// When the pending connect timeout fires, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.connect_deadline
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    /// Transport finished (or failed) connecting. On success the upgrade
    /// request goes out.
    pub fn on_connected(&mut self, result: io::Result<()>) {
        if self.state != ReadyState::Connecting || self.handshake_complete {
            return;
        }
        if let Err(e) = result {
            self.fail(ErrorCode::Normal, e.to_string());
            return;
        }

        let request = handshake::build_request(&self.url, &self.handshake_key);
        debug!("sending upgrade request for {}{}", self.url.host_header(), self.url.path);
        if let Err(e) = self.transport.write(request.as_bytes()) {
            self.fail(ErrorCode::Normal, e.to_string());
        }
    }

    /// Feeds one read's worth of bytes. An empty chunk means EOF.
    pub fn on_bytes(&mut self, chunk: &[u8]) {
        if self.state == ReadyState::Closed {
            return;
        }
        if chunk.is_empty() {
            self.fail(ErrorCode::Normal, "connection close because of read EOF".to_string());
            return;
        }

        if self.handshake_complete {
            self.inbound.push(chunk);
            self.dispatch_frames();
        } else {
            self.process_handshake(chunk);
        }
    }

    pub fn on_read_error(&mut self, err: io::Error) {
        self.fail(ErrorCode::Normal, err.to_string());
    }

    pub fn on_write_error(&mut self, err: io::Error) {
        self.fail(ErrorCode::Normal, err.to_string());
    }

    /// Fires the connect timeout if it is armed and `now` has reached it.
    pub fn on_tick(&mut self, now: Instant) {
        match self.connect_deadline {
            Some(deadline) if now >= deadline => {
                self.connect_deadline = None;
                if self.state == ReadyState::Connecting {
                    self.fail(ErrorCode::Normal, "connection timeout".to_string());
                }
            }
            _ => {}
        }
    }

    /// Sends a masked TEXT frame. Strings go out as UTF-8, byte slices as is.
    pub fn send<'a, P: Into<Payload<'a>>>(&mut self, payload: P) -> Result<()> {
        self.ensure_open()?;
        let opts = FrameOptions {
            payload: Some(payload.into()),
            mask: true,
            close: false,
        };
        let frame = encode_frame(&opts, &self.rng)?;
        self.write_frame(&frame);
        Ok(())
    }

    /// Sends a masked BINARY frame.
    pub fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let key = generate_mask_key(&self.rng)?;
        let frame = encode_with_key(Opcode::Binary, data, Some(key));
        self.write_frame(&frame);
        Ok(())
    }

    /// Tears the connection down. The `Close` event is emitted only on the
    /// first call made while `Open`; the transport is shut down and released
    /// on every call.
    pub fn close(&mut self) {
        self.disarm_deadline();

        if self.state == ReadyState::Open {
            self.state = ReadyState::Closing;
            let opts = FrameOptions {
                payload: None,
                mask: true,
                close: true,
            };
            match encode_frame(&opts, &self.rng) {
                Ok(frame) => {
                    if let Err(e) = self.transport.write(&frame) {
                        debug!("close frame write: {}", e);
                    }
                }
                Err(e) => debug!("close frame encode: {}", e),
            }
            info!("websocket to {} closed", self.url.host_header());
            self.events.push_back(Event::Close);
        }

        if let Err(e) = self.transport.shutdown() {
            debug!("transport shutdown: {}", e);
        }
        self.transport.read_stop();
        self.transport.close();

        self.state = ReadyState::Closed;
        self.inbound.clear();
        self.handshake_buf.clear();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == ReadyState::Open {
            Ok(())
        } else {
            error!("cannot send msg that readyState != OPEN ({:?})", self.state);
            Err(WsError::NotOpen(self.state))
        }
    }

    fn write_frame(&mut self, frame: &[u8]) {
        if let Err(e) = self.transport.write(frame) {
            self.fail(ErrorCode::Normal, e.to_string());
        }
    }

    fn disarm_deadline(&mut self) {
        self.connect_deadline = None;
    }

    /// Terminal failure: report it, then close. No-op once closed.
    fn fail(&mut self, code: ErrorCode, message: String) {
        if self.state == ReadyState::Closed {
            return;
        }
        self.disarm_deadline();
        error!("websocket error {:?}: {}", code, message);
        self.events.push_back(Event::Error(ErrorEvent { code, message }));
        self.close();
    }

    fn process_handshake(&mut self, chunk: &[u8]) {
        self.handshake_buf.extend_from_slice(chunk);

        let status = self.handshake_scan.scan(
            &self.handshake_buf,
            self.expected_accept.as_deref(),
            self.config.max_handshake_size,
        );
        let header_len = match status {
            Ok(HandshakeStatus::Complete { header_len }) => header_len,
            Ok(HandshakeStatus::Partial) => return,
            Err(e) => {
                error!("{}", String::from_utf8_lossy(&self.handshake_buf));
                self.fail(ErrorCode::HandshakeFailed, e.to_string());
                return;
            }
        };

        self.disarm_deadline();
        self.handshake_complete = true;
        let leftover = self.handshake_buf.split_off(header_len);
        self.handshake_buf = Vec::new();

        if self.state != ReadyState::Connecting {
            self.close();
            return;
        }

        self.state = ReadyState::Open;
        info!("websocket to {} open", self.url.host_header());
        self.events.push_back(Event::Open);

        // Frames that arrived in the same read as the response.
        if !leftover.is_empty() {
            self.inbound.push(&leftover);
            self.dispatch_frames();
        }
    }

    fn dispatch_frames(&mut self) {
        while self.state == ReadyState::Open {
            match self.inbound.next_frame() {
                Ok(Some(frame)) => self.dispatch(frame),
                Ok(None) => break,
                Err(e) => {
                    self.fail(ErrorCode::Normal, format!("protocol error: {}", e));
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        debug!(
            "WS Receive Frame: fin={}, opcode={:?}, masked={}, payloadLen={}",
            frame.fin,
            frame.opcode,
            frame.masked(),
            frame.payload.len()
        );

        match frame.opcode {
            Opcode::Text => match frame.text() {
                Ok(text) => self.events.push_back(Event::Message(Message::Text(text))),
                Err(e) => self.fail(ErrorCode::Normal, format!("protocol error: {}", e)),
            },
            Opcode::Binary => self
                .events
                .push_back(Event::Message(Message::Binary(frame.payload.to_vec()))),
            Opcode::Close => {
                debug!("peer sent close");
                self.close();
            }
            Opcode::Ping | Opcode::Pong | Opcode::Continuation => {
                warn!("ignoring {:?} frame ({} bytes)", frame.opcode, frame.payload.len());
            }
        }
    }
}
