//! Per-connection outbound handle.
//!
//! The transport owns the socket; the core only ever sees a
//! [`ConnectionHandle`], a cheap clone of the sending half of the
//! connection's outbound queue. The queue is bounded and pushing never
//! blocks: a client that stops reading loses events instead of growing
//! the queue.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use courier_shared::protocol::ServerEvent;
use courier_shared::ConnectionId;

/// Outbound events buffered per connection before pushes start failing.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver the transport drains into the socket.
    pub fn new() -> (Self, mpsc::Receiver<ServerEvent>) {
        Self::with_capacity(OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event. Returns `false` if the connection is gone or its
    /// queue is full.
    pub fn push(&self, event: ServerEvent) -> bool {
        let name = event.name();
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(conn = %self.id.short(), event = name, "Dropping event for slow connection");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn = %self.id.short(), event = name, "Dropping event for closed connection");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
