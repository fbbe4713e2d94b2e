//! Host-driven transport
//!
//! For hosts that already own their network stack (a WebSocket client, a
//! serial port reader, an FFI callback): the host keeps a [`PushHandle`]
//! and pushes each payload it receives. The session sees the same events
//! it would get from any other transport.

use super::{EventSink, Transport};
use crate::error::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct PushShared {
    sink: Mutex<Option<EventSink>>,
    refuse: AtomicBool,
    opens: AtomicU64,
}

/// Transport whose data comes from a [`PushHandle`]
#[derive(Debug)]
pub struct PushTransport {
    shared: Arc<PushShared>,
}

/// Host-side handle for a [`PushTransport`]
#[derive(Debug, Clone)]
pub struct PushHandle {
    shared: Arc<PushShared>,
}

impl PushTransport {
    /// Create a transport and the handle that feeds it
    pub fn new() -> (Self, PushHandle) {
        let shared = Arc::new(PushShared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            PushHandle { shared },
        )
    }
}

impl Transport for PushTransport {
    fn open(&mut self, sink: EventSink) -> Result<()> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);

        if self.shared.refuse.load(Ordering::SeqCst) {
            sink.error("Connection refused");
            return Ok(());
        }

        sink.opened();
        *self.shared.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        Ok(())
    }

    fn close(&mut self) {
        self.shared
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn describe(&self) -> String {
        "push".to_string()
    }
}

impl PushHandle {
    fn with_sink(&self, f: impl FnOnce(&EventSink) -> bool) -> bool {
        self.shared
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(f)
    }

    /// Deliver one payload. Returns `false` if no connection is open.
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> bool {
        self.with_sink(|sink| sink.batch(payload))
    }

    /// End the connection as if the remote side hung up
    pub fn close(&self, reason: impl Into<String>) -> bool {
        let sink = self
            .shared
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        sink.is_some_and(|sink| sink.closed(reason))
    }

    /// End the connection with an error
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let sink = self
            .shared
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        sink.is_some_and(|sink| sink.error(reason))
    }

    /// Make subsequent opens fail (or succeed again)
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Whether a connection is currently open
    pub fn is_open(&self) -> bool {
        self.with_sink(|_| true)
    }

    /// How many times the transport has been opened
    pub fn open_count(&self) -> u64 {
        self.shared.opens.load(Ordering::SeqCst)
    }
}
