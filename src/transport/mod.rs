//! Transport boundary
//!
//! A [`Transport`] produces raw payloads from somewhere outside the
//! pipeline. It never calls into the session directly: everything it has to
//! say is a [`TransportEvent`] sent through the [`EventSink`] it was given
//! when opened. The sink stamps each event with the connection's
//! generation, so the session can discard late events from a connection it
//! has already replaced or closed.
//!
//! # Implementations
//!
//! - [`TcpTransport`] - newline-delimited payloads over a TCP socket
//! - [`PushTransport`] - the host pushes payloads it received elsewhere
//! - [`SimulatedTransport`] - generated waveforms for demos and tests

pub mod push;
pub mod simulated;
pub mod tcp;

pub use push::{PushHandle, PushTransport};
pub use simulated::{SimulatedConfig, SimulatedTransport, Waveform};
pub use tcp::{TcpConfig, TcpTransport};

use crate::config::TransportConfig;
use crate::error::Result;
use crate::session::SessionMessage;
use crossbeam_channel::Sender;

/// Something a transport reports about its connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is open and data may follow
    Opened,
    /// One raw payload
    BatchReceived(Vec<u8>),
    /// The connection ended
    Closed(String),
    /// The connection failed
    ErrorOccurred(String),
}

/// A transport event tagged with the connection it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Where a transport sends its events
///
/// Cloning is cheap; reader threads usually take their own clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: Sender<SessionMessage>,
}

impl EventSink {
    /// Create a sink for connection `generation`
    pub fn new(generation: u64, tx: Sender<SessionMessage>) -> Self {
        Self { generation, tx }
    }

    /// Connection generation this sink stamps onto events
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Send an event. Returns `false` once the session has gone away.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionMessage::Transport(StampedEvent {
                generation: self.generation,
                event,
            }))
            .is_ok()
    }

    pub fn opened(&self) -> bool {
        self.send(TransportEvent::Opened)
    }

    pub fn batch(&self, payload: impl Into<Vec<u8>>) -> bool {
        self.send(TransportEvent::BatchReceived(payload.into()))
    }

    pub fn closed(&self, reason: impl Into<String>) -> bool {
        self.send(TransportEvent::Closed(reason.into()))
    }

    pub fn error(&self, reason: impl Into<String>) -> bool {
        self.send(TransportEvent::ErrorOccurred(reason.into()))
    }
}

/// Source of raw sample payloads
///
/// `open` must not block for long: implementations that do I/O spawn a
/// reader thread and report through the sink. A failure that is known
/// immediately may be returned as an `Err` instead of an event.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Open a connection and start delivering events to `sink`
    fn open(&mut self, sink: EventSink) -> Result<()>;

    /// Close the current connection. Idempotent.
    fn close(&mut self);

    /// Human-readable description for logs and status output
    fn describe(&self) -> String;
}

/// Build the transport described by `config`
pub fn build_transport(config: &TransportConfig) -> Box<dyn Transport> {
    match config {
        TransportConfig::Tcp(tcp) => Box::new(TcpTransport::new(tcp.clone())),
        TransportConfig::Simulated(sim) => Box::new(SimulatedTransport::new(sim.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_sink_stamps_generation() {
        let (tx, rx) = unbounded();
        let sink = EventSink::new(7, tx);
        assert!(sink.batch("[1]"));
        assert!(sink.closed("eof"));

        let events: Vec<StampedEvent> = rx
            .try_iter()
            .filter_map(|msg| match msg {
                SessionMessage::Transport(stamped) => Some(stamped),
                SessionMessage::Command(_) => None,
            })
            .collect();
        assert_eq!(
            events,
            vec![
                StampedEvent {
                    generation: 7,
                    event: TransportEvent::BatchReceived(b"[1]".to_vec()),
                },
                StampedEvent {
                    generation: 7,
                    event: TransportEvent::Closed("eof".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_sink_reports_dropped_session() {
        let (tx, rx) = unbounded();
        let sink = EventSink::new(1, tx);
        drop(rx);
        assert!(!sink.opened());
    }

    #[test]
    fn test_build_transport_describes_config() {
        let tcp = build_transport(&TransportConfig::Tcp(TcpConfig {
            address: "127.0.0.1:9000".to_string(),
            ..Default::default()
        }));
        assert!(tcp.describe().contains("127.0.0.1:9000"));

        let sim = build_transport(&TransportConfig::Simulated(SimulatedConfig::default()));
        assert!(sim.describe().starts_with("simulated"));
    }
}
