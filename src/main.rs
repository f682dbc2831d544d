use std::env;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use rtrb::{Producer, RingBuffer};
use tracing_subscriber::EnvFilter;

use sockwire::{ConnectConfig, Connection, Event, EventLoop, Message, MioTransport};

/// Installs the fmt subscriber. `WS_LOG` takes `EnvFilter` directives
/// (`debug`, `sockwire=trace,rustls=warn`); `log` records from the library
/// reach it through the `tracing-log` bridge.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(env::var("WS_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() {
    let _ = dotenv::dotenv();
    init_logging();

    let url = env_or("WS_URL", "wss://echo.websocket.org");
    let greeting = env_or("WS_MESSAGE", "hello");
    let max_messages: usize = env_or("WS_MAX_MESSAGES", "2").parse().unwrap_or(2);
    let pin_core: Option<usize> = env::var("WS_PIN_CORE").ok().and_then(|v| v.parse().ok());

    let config = match ConnectConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    // Network thread hands messages to the printer thread without locking.
    let (mut producer, mut consumer) = RingBuffer::<Message>::new(1024);
    let done = Arc::new(AtomicBool::new(false));

    let printer_done = Arc::clone(&done);
    let printer = thread::spawn(move || loop {
        match consumer.pop() {
            Ok(Message::Text(text)) => println!("< {}", text),
            Ok(Message::Binary(data)) => println!("< [{} bytes]", data.len()),
            Err(_) if printer_done.load(Ordering::Acquire) => break,
            Err(_) => thread::sleep(Duration::from_millis(1)),
        }
    });

    let net_done = Arc::clone(&done);
    let network = thread::spawn(move || {
        if let Some(core) = pin_core.and_then(|i| core_affinity::get_core_ids()?.into_iter().nth(i)) {
            if core_affinity::set_for_current(core) {
                info!("network thread pinned to core {:?}", core);
            }
        }

        let result = run_client(&url, config, &greeting, max_messages, &mut producer);
        net_done.store(true, Ordering::Release);
        result
    });

    let exit_code = match network.join() {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            error!("{}", e);
            1
        }
        Err(_) => {
            error!("network thread panicked");
            done.store(true, Ordering::Release);
            1
        }
    };
    let _ = printer.join();
    std::process::exit(exit_code);
}

fn run_client(
    url: &str,
    config: ConnectConfig,
    greeting: &str,
    max_messages: usize,
    producer: &mut Producer<Message>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let transport = MioTransport::with_default_tls()?;
    let conn = Connection::connect(url, config, transport)?;
    let mut event_loop = EventLoop::new(conn)?;

    let mut received = 0usize;
    event_loop.run(|conn, event| match event {
        Event::Open => {
            info!("connected to {}", url);
            if let Err(e) = conn.send(greeting) {
                error!("send failed: {}", e);
            }
        }
        Event::Message(message) => {
            received += 1;
            if producer.push(message).is_err() {
                warn!("printer queue full, dropping message");
            }
            if received >= max_messages {
                conn.close();
            }
        }
        Event::Close => info!("connection closed after {} messages", received),
        Event::Error(e) => error!("{:?} ({}): {}", e.code, e.code as u16, e.message),
    })?;

    Ok(())
}
