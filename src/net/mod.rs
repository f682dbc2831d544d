pub mod event_loop;
pub mod framing;
pub mod handshake;
pub mod tcp_opt;
pub mod tls_client;
pub mod transport;
pub mod ws_client;
