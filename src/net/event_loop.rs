use std::io;
use std::time::Instant;

use log::debug;
use mio::{Events, Poll, Token};

use crate::net::transport::{MioTransport, ReadOutcome};
use crate::net::ws_client::{Connection, Event, ReadyState};

// Token for our socket in the mio poll
const WS_TOKEN: Token = Token(0);

/// Single-threaded driver for one connection: polls the socket, reports
/// connect completion and inbound bytes, flushes output and fires the
/// connect timeout.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    conn: Connection<MioTransport>,
    connected: bool,
    read_buf: Vec<u8>,
}

impl EventLoop {
    pub fn new(mut conn: Connection<MioTransport>) -> io::Result<Self> {
        let poll = Poll::new()?;
        if conn.transport().is_open() {
            conn.transport_mut().register(poll.registry(), WS_TOKEN)?;
        }
        let read_buf = vec![0u8; conn.config().read_buffer_size.max(1)];

        Ok(Self {
            poll,
            events: Events::with_capacity(128),
            conn,
            connected: false,
            read_buf,
        })
    }

    pub fn connection(&self) -> &Connection<MioTransport> {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection<MioTransport> {
        &mut self.conn
    }

    /// Runs until the connection is closed, handing every event to `handler`
    /// together with the connection so it can send or close.
    pub fn run<F>(&mut self, mut handler: F) -> io::Result<()>
    where
        F: FnMut(&mut Connection<MioTransport>, Event),
    {
        loop {
            while let Some(event) = self.conn.poll_event() {
                handler(&mut self.conn, event);
            }
            if self.conn.state() == ReadyState::Closed {
                return Ok(());
            }
            self.turn()?;
        }
    }

    /// One poll iteration. Blocks until socket activity or the connect
    /// deadline, whichever comes first.
    pub fn turn(&mut self) -> io::Result<()> {
        let timeout = self
            .conn
            .deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }

        let mut readable = false;
        let mut writable = false;
        for event in self.events.iter() {
            if event.token() == WS_TOKEN {
                readable |= event.is_readable() || event.is_read_closed() || event.is_error();
                writable |= event.is_writable();
            }
        }

        if !self.connected && (readable || writable) {
            match self.conn.transport_mut().finish_connect() {
                Ok(true) => {
                    debug!("tcp connected");
                    self.connected = true;
                    self.conn.on_connected(Ok(()));
                }
                Ok(false) => {}
                Err(e) => self.conn.on_connected(Err(e)),
            }
        }

        if self.connected {
            self.flush();
            if readable {
                self.read_available();
            }
            // reads can produce output: TLS records, a close reply
            self.flush();
        }

        self.conn.on_tick(Instant::now());
        Ok(())
    }

    // Edge-triggered: drain until the socket would block.
    fn read_available(&mut self) {
        while self.conn.transport().is_reading() {
            match self.conn.transport_mut().read(&mut self.read_buf) {
                Ok(ReadOutcome::Data(n)) => self.conn.on_bytes(&self.read_buf[..n]),
                Ok(ReadOutcome::WouldBlock) => break,
                Ok(ReadOutcome::Eof) => {
                    self.conn.on_bytes(&[]);
                    break;
                }
                Err(e) => {
                    self.conn.on_read_error(e);
                    break;
                }
            }
        }
    }

    fn flush(&mut self) {
        if !self.conn.transport().wants_write() {
            return;
        }
        if let Err(e) = self.conn.transport_mut().flush() {
            self.conn.on_write_error(e);
        }
    }
}
