use std::io::{self, Read, Write};
use std::sync::Arc;

use mio::net::TcpStream;
use rustls::{pki_types::ServerName, ClientConfig, ClientConnection, RootCertStore};

use crate::net::transport::ReadOutcome;

/// Client config trusting the Mozilla roots shipped in `webpki-roots`, with
/// the ring provider passed explicitly instead of installed process-wide.
pub fn default_config() -> io::Result<Arc<ClientConfig>> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// A non-blocking TLS session over a mio TcpStream.
/// No internal locking, all state is owned by the struct.
pub struct TlsClient {
    pub socket: TcpStream,
    pub tls_conn: ClientConnection,
}

impl TlsClient {
    pub fn new(socket: TcpStream, server_name: &str, config: Arc<ClientConfig>) -> io::Result<Self> {
        let server_name = ServerName::try_from(server_name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Invalid DNS name"))?
            .to_owned();

        let tls_conn = ClientConnection::new(config, server_name)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        Ok(Self { socket, tls_conn })
    }

    pub fn wants_write(&self) -> bool {
        self.tls_conn.wants_write()
    }

    /// Reads decrypted bytes into `buf`, pulling more records off the socket
    /// when the plaintext buffer runs dry.
    pub fn read_plaintext(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        loop {
            match self.tls_conn.reader().read(buf) {
                // close_notify from the peer
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            match self.tls_conn.read_tls(&mut self.socket) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(_) => {
                    self.tls_conn
                        .process_new_packets()
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Queues plaintext; it is encrypted and sent by `write_tls`. Data written
    /// before the TLS handshake finishes is held until it does.
    pub fn write_plaintext(&mut self, buf: &[u8]) -> io::Result<()> {
        self.tls_conn.writer().write_all(buf)
    }

    /// Pushes encrypted records to the socket until done or the socket would block.
    pub fn write_tls(&mut self) -> io::Result<()> {
        while self.tls_conn.wants_write() {
            match self.tls_conn.write_tls(&mut self.socket) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(_) => {}
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn send_close_notify(&mut self) {
        self.tls_conn.send_close_notify();
    }
}
