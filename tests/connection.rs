use std::io;
use std::time::{Duration, Instant};

use sockwire::net::framing::{decode_frame, encode_with_key};
use sockwire::net::handshake::compute_accept_key;
use sockwire::{
    ConnectConfig, Connection, ErrorCode, ErrorEvent, Event, Message, Opcode, ReadyState, Transport, WsError,
};

#[derive(Debug, Default)]
struct MockTransport {
    connects: Vec<(String, u16, bool)>,
    writes: Vec<Vec<u8>>,
    shutdowns: usize,
    read_stops: usize,
    closes: usize,
    fail_connect: bool,
    fail_write: bool,
}

impl Transport for MockTransport {
    fn connect(&mut self, host: &str, port: u16, secure: bool) -> io::Result<()> {
        self.connects.push((host.to_string(), port, secure));
        if self.fail_connect {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        }
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fail_write {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        self.writes.push(bytes.to_vec());
        Ok(())
    }

    fn read_stop(&mut self) {
        self.read_stops += 1;
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.shutdowns += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.closes += 1;
    }
}

const URL: &str = "ws://example.com:9001/chat";
const BARE_RESPONSE: &[u8] =
    b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";

fn upgrade_response(key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        compute_accept_key(key)
    )
    .into_bytes()
}

fn connecting(config: ConnectConfig, now: Instant) -> Connection<MockTransport> {
    let mut conn = Connection::connect_at(URL, config, MockTransport::default(), now).unwrap();
    conn.on_connected(Ok(()));
    conn
}

fn open() -> Connection<MockTransport> {
    let mut conn = connecting(ConnectConfig::default(), Instant::now());
    let response = upgrade_response(conn.handshake_key());
    conn.on_bytes(&response);
    assert_eq!(conn.drain_events(), vec![Event::Open]);
    conn
}

fn text_frame(text: &str) -> Vec<u8> {
    encode_with_key(Opcode::Text, text.as_bytes(), None)
}

fn error_code(event: &Event) -> Option<ErrorCode> {
    match event {
        Event::Error(ErrorEvent { code, .. }) => Some(*code),
        _ => None,
    }
}

#[test]
fn connect_sends_upgrade_request() {
    let conn = connecting(ConnectConfig::default(), Instant::now());
    let transport = conn.transport();

    assert_eq!(transport.connects, vec![("example.com".to_string(), 9001, false)]);
    assert_eq!(transport.writes.len(), 1);

    let request = String::from_utf8(transport.writes[0].clone()).unwrap();
    assert!(request.starts_with("GET /chat HTTP/1.1\r\n"));
    assert!(request.contains("Host: example.com:9001\r\n"));
    assert!(request.contains("Upgrade: websocket\r\n"));
    assert!(request.contains("Connection: Upgrade\r\n"));
    assert!(request.contains(&format!("Sec-WebSocket-Key: {}\r\n", conn.handshake_key())));
    assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
    assert_eq!(conn.state(), ReadyState::Connecting);
}

#[test]
fn wss_selects_tls_and_default_port() {
    let conn = Connection::connect("wss://example.com/feed", ConnectConfig::default(), MockTransport::default())
        .unwrap();
    assert_eq!(conn.transport().connects, vec![("example.com".to_string(), 443, true)]);
}

#[test]
fn unsupported_scheme_is_a_configuration_error() {
    let err = Connection::connect("http://example.com", ConnectConfig::default(), MockTransport::default())
        .err()
        .unwrap();
    assert!(matches!(err, WsError::UnsupportedScheme(ref s) if s == "http"));
}

#[test]
fn successful_handshake_opens() {
    let conn = open();
    assert_eq!(conn.state(), ReadyState::Open);
    assert!(conn.is_handshake_complete());
    assert_eq!(conn.deadline(), None);
}

#[test]
fn bare_response_accepted_when_accept_check_is_off() {
    let mut conn = connecting(ConnectConfig::default().with_verify_accept(false), Instant::now());
    conn.on_bytes(BARE_RESPONSE);
    assert_eq!(conn.drain_events(), vec![Event::Open]);
}

#[test]
fn non_101_status_fails_without_opening() {
    let mut conn = connecting(ConnectConfig::default(), Instant::now());
    conn.on_bytes(b"HTTP/1.1 200 OK\r\n\r\n");

    let events = conn.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(error_code(&events[0]), Some(ErrorCode::HandshakeFailed));
    assert_eq!(conn.state(), ReadyState::Closed);
    assert!(!conn.is_handshake_complete());
    assert_eq!(conn.transport().shutdowns, 1);
    assert_eq!(conn.transport().closes, 1);
}

#[test]
fn wrong_accept_key_fails_handshake() {
    let mut conn = connecting(ConnectConfig::default(), Instant::now());
    conn.on_bytes(&upgrade_response("c29tZSBvdGhlciBrZXk="));

    let events = conn.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(error_code(&events[0]), Some(ErrorCode::HandshakeFailed));
    assert_eq!(conn.state(), ReadyState::Closed);
}

#[test]
fn leftover_frame_is_dispatched_without_another_read() {
    let mut conn = connecting(ConnectConfig::default(), Instant::now());
    let mut chunk = upgrade_response(conn.handshake_key());
    chunk.extend(text_frame("hello"));

    conn.on_bytes(&chunk);

    assert_eq!(
        conn.drain_events(),
        vec![Event::Open, Event::Message(Message::Text("hello".to_string()))]
    );
    assert_eq!(conn.state(), ReadyState::Open);
}

#[test]
fn handshake_split_across_reads() {
    let mut conn = connecting(ConnectConfig::default(), Instant::now());
    let response = upgrade_response(conn.handshake_key());
    let (head, tail) = response.split_at(20);

    conn.on_bytes(head);
    assert!(conn.drain_events().is_empty());
    assert_eq!(conn.state(), ReadyState::Connecting);

    conn.on_bytes(tail);
    assert_eq!(conn.drain_events(), vec![Event::Open]);
}

#[test]
fn connect_timeout_fires_once() {
    let start = Instant::now();
    let config = ConnectConfig::default().with_connect_timeout(Duration::from_secs(5));
    let mut conn = connecting(config, start);
    assert_eq!(conn.deadline(), Some(start + Duration::from_secs(5)));

    conn.on_tick(start + Duration::from_secs(4));
    assert!(conn.drain_events().is_empty());

    conn.on_tick(start + Duration::from_secs(5));
    let events = conn.drain_events();
    assert_eq!(
        events,
        vec![Event::Error(ErrorEvent {
            code: ErrorCode::Normal,
            message: "connection timeout".to_string(),
        })]
    );
    assert_eq!(conn.state(), ReadyState::Closed);

    conn.on_tick(start + Duration::from_secs(60));
    assert!(conn.drain_events().is_empty());
}

#[test]
fn timer_is_cancelled_by_successful_handshake() {
    let start = Instant::now();
    let mut conn = connecting(ConnectConfig::default(), start);
    let response = upgrade_response(conn.handshake_key());
    conn.on_bytes(&response);
    assert_eq!(conn.drain_events(), vec![Event::Open]);

    conn.on_tick(start + Duration::from_secs(3600));
    assert!(conn.drain_events().is_empty());
    assert_eq!(conn.state(), ReadyState::Open);
}

#[test]
fn send_outside_open_does_not_write() {
    let mut conn = connecting(ConnectConfig::default(), Instant::now());
    let err = conn.send("too early").unwrap_err();
    assert!(matches!(err, WsError::NotOpen(ReadyState::Connecting)));
    assert_eq!(conn.transport().writes.len(), 1);

    conn.close();
    assert!(matches!(conn.send("too late"), Err(WsError::NotOpen(ReadyState::Closed))));
    assert!(matches!(conn.send_binary(&[1, 2]), Err(WsError::NotOpen(ReadyState::Closed))));
    assert_eq!(conn.transport().writes.len(), 1);
}

#[test]
fn send_writes_masked_text_frame() {
    let mut conn = open();
    conn.send("ping me").unwrap();

    let written = conn.transport().writes.last().unwrap().clone();
    assert_eq!(written[1] & 0x80, 0x80, "client frames must be masked");

    let (frame, consumed) = decode_frame(&written).unwrap().unwrap();
    assert_eq!(consumed, written.len());
    assert!(frame.fin);
    assert_eq!(frame.opcode, Opcode::Text);
    assert_eq!(&frame.payload[..], b"ping me");
}

#[test]
fn send_bytes_uses_text_opcode_and_send_binary_uses_binary() {
    let mut conn = open();
    let data = vec![0u8, 159, 146, 150];

    conn.send(data.as_slice()).unwrap();
    let (frame, _) = decode_frame(conn.transport().writes.last().unwrap()).unwrap().unwrap();
    assert_eq!(frame.opcode, Opcode::Text);
    assert_eq!(&frame.payload[..], &data[..]);

    conn.send_binary(&data).unwrap();
    let (frame, _) = decode_frame(conn.transport().writes.last().unwrap()).unwrap().unwrap();
    assert_eq!(frame.opcode, Opcode::Binary);
    assert_eq!(&frame.payload[..], &data[..]);
}

#[test]
fn frames_split_and_batched_across_reads() {
    let mut conn = open();
    let mut wire = text_frame("first");
    wire.extend(encode_with_key(Opcode::Binary, &[7, 8, 9], Some([1, 2, 3, 4])));
    wire.extend(text_frame("third"));

    let (a, rest) = wire.split_at(3);
    let (b, c) = rest.split_at(9);
    conn.on_bytes(a);
    assert!(conn.drain_events().is_empty());
    conn.on_bytes(b);
    conn.on_bytes(c);

    assert_eq!(
        conn.drain_events(),
        vec![
            Event::Message(Message::Text("first".to_string())),
            Event::Message(Message::Binary(vec![7, 8, 9])),
            Event::Message(Message::Text("third".to_string())),
        ]
    );
}

#[test]
fn peer_close_frame_closes_once() {
    let mut conn = open();
    conn.on_bytes(&encode_with_key(Opcode::Close, &[], None));

    assert_eq!(conn.drain_events(), vec![Event::Close]);
    assert_eq!(conn.state(), ReadyState::Closed);

    let (reply, _) = decode_frame(conn.transport().writes.last().unwrap()).unwrap().unwrap();
    assert_eq!(reply.opcode, Opcode::Close);
    assert!(reply.masked());

    // transport error racing with the close
    conn.on_read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
    conn.close();
    assert!(conn.drain_events().is_empty());
}

#[test]
fn frames_after_close_in_same_read_are_dropped() {
    let mut conn = open();
    let mut wire = encode_with_key(Opcode::Close, &[], None);
    wire.extend(text_frame("late"));
    conn.on_bytes(&wire);
    assert_eq!(conn.drain_events(), vec![Event::Close]);
}

#[test]
fn close_is_observably_idempotent() {
    let mut conn = open();
    conn.close();
    conn.close();

    assert_eq!(conn.drain_events(), vec![Event::Close]);
    assert_eq!(conn.state(), ReadyState::Closed);
    assert_eq!(conn.transport().shutdowns, 2);
    assert_eq!(conn.transport().read_stops, 2);
    assert_eq!(conn.transport().closes, 2);
}

#[test]
fn close_while_connecting_emits_nothing() {
    let mut conn = connecting(ConnectConfig::default(), Instant::now());
    conn.close();
    assert!(conn.drain_events().is_empty());
    assert_eq!(conn.state(), ReadyState::Closed);
    assert_eq!(conn.deadline(), None);

    let response = upgrade_response(conn.handshake_key());
    conn.on_bytes(&response);
    assert!(conn.drain_events().is_empty());
    assert_eq!(conn.state(), ReadyState::Closed);
}

#[test]
fn eof_before_handshake_is_an_error() {
    let mut conn = connecting(ConnectConfig::default(), Instant::now());
    conn.on_bytes(&[]);
    assert_eq!(
        conn.drain_events(),
        vec![Event::Error(ErrorEvent {
            code: ErrorCode::Normal,
            message: "connection close because of read EOF".to_string(),
        })]
    );
    assert_eq!(conn.state(), ReadyState::Closed);
    assert_eq!(conn.deadline(), None);
}

#[test]
fn eof_while_open_errors_then_closes() {
    let mut conn = open();
    conn.on_bytes(&[]);
    let events = conn.drain_events();
    assert_eq!(events.len(), 2);
    assert_eq!(error_code(&events[0]), Some(ErrorCode::Normal));
    assert_eq!(events[1], Event::Close);
}

#[test]
fn transport_connect_failure_is_reported() {
    let transport = MockTransport {
        fail_connect: true,
        ..MockTransport::default()
    };
    let mut conn = Connection::connect(URL, ConnectConfig::default(), transport).unwrap();
    let events = conn.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(error_code(&events[0]), Some(ErrorCode::Normal));
    assert_eq!(conn.state(), ReadyState::Closed);
    assert_eq!(conn.deadline(), None);
}

#[test]
fn async_connect_failure_is_reported() {
    let mut conn = Connection::connect(URL, ConnectConfig::default(), MockTransport::default()).unwrap();
    conn.on_connected(Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")));
    let events = conn.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(error_code(&events[0]), Some(ErrorCode::Normal));
    assert!(conn.transport().writes.is_empty());
}

#[test]
fn write_failure_on_send_closes() {
    let mut conn = open();
    conn.transport_mut().fail_write = true;
    conn.send("lost").unwrap();

    let events = conn.drain_events();
    assert_eq!(events.len(), 2);
    assert_eq!(error_code(&events[0]), Some(ErrorCode::Normal));
    assert_eq!(events[1], Event::Close);
}

#[test]
fn close_with_a_dead_peer_still_closes_cleanly() {
    let mut conn = open();
    conn.transport_mut().fail_write = true;
    conn.close();

    assert_eq!(conn.drain_events(), vec![Event::Close]);
    assert_eq!(conn.state(), ReadyState::Closed);
    let transport = conn.transport();
    assert_eq!((transport.shutdowns, transport.read_stops, transport.closes), (1, 1, 1));
    // only the upgrade request went out
    assert_eq!(transport.writes.len(), 1);
}

#[test]
fn control_and_continuation_frames_are_ignored() {
    let mut conn = open();
    conn.on_bytes(&encode_with_key(Opcode::Ping, b"are you there", None));
    conn.on_bytes(&encode_with_key(Opcode::Pong, &[], None));
    conn.on_bytes(&encode_with_key(Opcode::Continuation, b"tail", None));

    assert!(conn.drain_events().is_empty());
    assert_eq!(conn.state(), ReadyState::Open);
    // nothing answered the ping
    assert_eq!(conn.transport().writes.len(), 1);
}

#[test]
fn oversized_frame_is_fatal() {
    let mut conn = connecting(ConnectConfig::default().with_max_frame_size(8), Instant::now());
    let response = upgrade_response(conn.handshake_key());
    conn.on_bytes(&response);
    conn.on_bytes(&text_frame("more than eight bytes"));

    let events = conn.drain_events();
    assert_eq!(events[0], Event::Open);
    assert_eq!(error_code(&events[1]), Some(ErrorCode::Normal));
    assert_eq!(events[2], Event::Close);
    assert_eq!(conn.state(), ReadyState::Closed);
}

#[test]
fn reserved_opcode_is_fatal() {
    let mut conn = open();
    conn.on_bytes(&[0x83, 0x00]);
    let events = conn.drain_events();
    assert_eq!(error_code(&events[0]), Some(ErrorCode::Normal));
    assert_eq!(events[1], Event::Close);
}

#[test]
fn invalid_utf8_text_is_fatal() {
    let mut conn = open();
    conn.on_bytes(&encode_with_key(Opcode::Text, &[0xc3, 0x28], None));
    let events = conn.drain_events();
    assert_eq!(error_code(&events[0]), Some(ErrorCode::Normal));
    assert_eq!(conn.state(), ReadyState::Closed);
}

#[test]
fn poll_event_yields_in_order() {
    let mut conn = open();
    conn.on_bytes(&text_frame("a"));
    conn.on_bytes(&text_frame("b"));
    assert_eq!(conn.poll_event(), Some(Event::Message(Message::Text("a".to_string()))));
    assert_eq!(conn.poll_event(), Some(Event::Message(Message::Text("b".to_string()))));
    assert_eq!(conn.poll_event(), None);
}
