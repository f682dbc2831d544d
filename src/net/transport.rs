use std::io::{self, Write};
use std::net::{Shutdown, ToSocketAddrs};
use std::sync::Arc;

use log::debug;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use rustls::ClientConfig;

use crate::net::tcp_opt;
use crate::net::tls_client::{self, TlsClient};

/// Byte-stream collaborator a `Connection` drives.
///
/// Reads are not part of the trait: whoever owns the event loop reads from
/// the transport and feeds the bytes to the connection.
pub trait Transport {
    /// Starts connecting. Completion is reported back through
    /// `Connection::on_connected`.
    fn connect(&mut self, host: &str, port: u16, secure: bool) -> io::Result<()>;

    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn read_stop(&mut self);

    /// Must tolerate being called more than once.
    fn shutdown(&mut self) -> io::Result<()>;

    /// Releases the handle. Must tolerate being called more than once.
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    WouldBlock,
    Eof,
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsClient>),
}

impl Stream {
    fn socket(&mut self) -> &mut TcpStream {
        match self {
            Stream::Plain(socket) => socket,
            Stream::Tls(tls) => &mut tls.socket,
        }
    }
}

/// TCP (optionally TLS) transport for a mio event loop.
pub struct MioTransport {
    stream: Option<Stream>,
    tls_config: Arc<ClientConfig>,
    /// Plain-TCP bytes the socket has not accepted yet.
    pending: Vec<u8>,
    reading: bool,
}

impl MioTransport {
    pub fn new(tls_config: Arc<ClientConfig>) -> Self {
        Self {
            stream: None,
            tls_config,
            pending: Vec::new(),
            reading: false,
        }
    }

    pub fn with_default_tls() -> io::Result<Self> {
        Ok(Self::new(tls_client::default_config()?))
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_reading(&self) -> bool {
        self.reading && self.stream.is_some()
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => registry.register(stream.socket(), token, Interest::READABLE | Interest::WRITABLE),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Checks a connect in flight. `Ok(true)` once the socket is connected,
    /// `Ok(false)` while it is still pending.
    pub fn finish_connect(&mut self) -> io::Result<bool> {
        let socket = match self.stream.as_mut() {
            Some(stream) => stream.socket(),
            None => return Err(io::ErrorKind::NotConnected.into()),
        };

        if let Some(err) = socket.take_error()? {
            return Err(err);
        }
        match socket.peer_addr() {
            Ok(_) => Ok(true),
            Err(ref e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(ReadOutcome::Eof),
        };

        match stream {
            Stream::Tls(tls) => tls.read_plaintext(buf),
            Stream::Plain(socket) => loop {
                match io::Read::read(socket, buf) {
                    Ok(0) => return Ok(ReadOutcome::Eof),
                    Ok(n) => return Ok(ReadOutcome::Data(n)),
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            },
        }
    }

    pub fn wants_write(&self) -> bool {
        match self.stream.as_ref() {
            Some(Stream::Plain(_)) => !self.pending.is_empty(),
            Some(Stream::Tls(tls)) => tls.wants_write(),
            None => false,
        }
    }

    /// Sends buffered output until done or the socket would block.
    pub fn flush(&mut self) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(Stream::Tls(tls)) => tls.write_tls(),
            Some(Stream::Plain(socket)) => {
                while !self.pending.is_empty() {
                    match socket.write(&self.pending) {
                        Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                        Ok(n) => {
                            self.pending.drain(..n);
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Transport for MioTransport {
    fn connect(&mut self, host: &str, port: u16, secure: bool) -> io::Result<()> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}:{port}")))?;
        debug!("connecting to {} ({:?}), tls: {}", host, addr, secure);

        let socket = tcp_opt::open_stream(addr)?;
        let stream = if secure {
            Stream::Tls(Box::new(TlsClient::new(socket, host, Arc::clone(&self.tls_config))?))
        } else {
            Stream::Plain(socket)
        };

        self.stream = Some(stream);
        self.pending.clear();
        self.reading = true;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(Stream::Tls(tls)) => tls.write_plaintext(bytes)?,
            Some(Stream::Plain(_)) => self.pending.extend_from_slice(bytes),
            None => return Err(io::ErrorKind::NotConnected.into()),
        }
        self.flush()
    }

    fn read_stop(&mut self) {
        self.reading = false;
    }

    fn shutdown(&mut self) -> io::Result<()> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(()),
        };

        if let Stream::Tls(tls) = &mut *stream {
            tls.send_close_notify();
            let _ = tls.write_tls();
        }
        match stream.socket().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }

    fn close(&mut self) {
        self.reading = false;
        self.pending.clear();
        self.stream = None;
    }
}
