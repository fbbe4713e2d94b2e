//! TCP transport
//!
//! Connects to a producer and reads newline-delimited payloads. Each line
//! (without its line terminator) is one batch. Every blocking call is
//! bounded: connecting by `connect_timeout_ms` and each read by
//! `read_timeout_ms`. Hitting either limit is reported as a transport
//! error, which the supervisor turns into a reconnect.

use super::{EventSink, Transport};
use crate::error::{LivescopeError, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Longest line accepted before the connection is treated as broken
pub const MAX_LINE_BYTES: u64 = 1024 * 1024;

/// TCP transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// `host:port` of the producer
    pub address: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7878".to_string(),
            connect_timeout_ms: 2_000,
            read_timeout_ms: 5_000,
        }
    }
}

/// A live connection's teardown handles
struct Connection {
    stop: Arc<AtomicBool>,
    stream: Arc<Mutex<Option<TcpStream>>>,
}

/// Newline-delimited payloads over TCP
pub struct TcpTransport {
    config: TcpConfig,
    connection: Option<Connection>,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    fn resolve(&self) -> Result<SocketAddr> {
        self.config
            .address
            .to_socket_addrs()
            .map_err(|e| {
                LivescopeError::Transport(format!(
                    "Failed to resolve {}: {}",
                    self.config.address, e
                ))
            })?
            .next()
            .ok_or_else(|| {
                LivescopeError::Transport(format!("No address found for {}", self.config.address))
            })
    }
}

impl Transport for TcpTransport {
    fn open(&mut self, sink: EventSink) -> Result<()> {
        self.close();

        let addr = self.resolve()?;
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms.max(1));
        let read_timeout = Duration::from_millis(self.config.read_timeout_ms.max(1));

        let stop = Arc::new(AtomicBool::new(false));
        let stream_slot = Arc::new(Mutex::new(None));
        self.connection = Some(Connection {
            stop: Arc::clone(&stop),
            stream: Arc::clone(&stream_slot),
        });

        std::thread::Builder::new()
            .name(format!("livescope-tcp-{}", sink.generation()))
            .spawn(move || {
                read_connection(addr, connect_timeout, read_timeout, &stop, &stream_slot, &sink)
            })
            .map_err(|e| LivescopeError::Transport(format!("Failed to spawn tcp reader: {}", e)))?;

        Ok(())
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.stop.store(true, Ordering::SeqCst);
            // Unblock a pending read; the reader exits on its own
            if let Some(stream) = connection
                .stream
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                let _ = stream.shutdown(Shutdown::Both);
            }
            tracing::debug!("Closed tcp transport to {}", self.config.address);
        }
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.config.address)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_connection(
    addr: SocketAddr,
    connect_timeout: Duration,
    read_timeout: Duration,
    stop: &AtomicBool,
    stream_slot: &Mutex<Option<TcpStream>>,
    sink: &EventSink,
) {
    let stream = match TcpStream::connect_timeout(&addr, connect_timeout) {
        Ok(stream) => stream,
        Err(e) => {
            if !stop.load(Ordering::SeqCst) {
                sink.error(format!("Failed to connect to {}: {}", addr, e));
            }
            return;
        }
    };

    let reader_stream = stream
        .set_read_timeout(Some(read_timeout))
        .and_then(|()| stream.try_clone());
    let reader_stream = match reader_stream {
        Ok(s) => s,
        Err(e) => {
            sink.error(format!("Failed to configure socket: {}", e));
            return;
        }
    };

    {
        let mut slot = stream_slot.lock().unwrap_or_else(PoisonError::into_inner);
        // Closed while we were connecting
        if stop.load(Ordering::SeqCst) {
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
        *slot = Some(stream);
    }

    tracing::info!("Connected to {}", addr);
    if !sink.opened() {
        return;
    }

    let mut reader = BufReader::new(reader_stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        let result = (&mut reader)
            .take(MAX_LINE_BYTES + 1)
            .read_until(b'\n', &mut line);

        if stop.load(Ordering::SeqCst) {
            return;
        }

        match result {
            Ok(0) => {
                sink.closed("Connection closed by peer");
                return;
            }
            Ok(_) if line.last() != Some(&b'\n') && line.len() as u64 > MAX_LINE_BYTES => {
                sink.error(format!("Line exceeds {} bytes", MAX_LINE_BYTES));
                return;
            }
            Ok(_) => {
                while matches!(line.last(), Some(b'\n' | b'\r')) {
                    line.pop();
                }
                if !sink.batch(line.as_slice()) {
                    return;
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                sink.error(format!("No data for {} ms", read_timeout.as_millis()));
                return;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                sink.error(format!("Read failed: {}", e));
                return;
            }
        }
    }
}
