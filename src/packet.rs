//! Envelope around one outbound method call
//!
//! A [`Packet`] owns exactly one [`Method`] and tracks its lifecycle while
//! it sits in the socket's queue. Callers keep a clone of the packet to
//! cancel an in-flight request; the socket uses the one-shot `send` and
//! `cancel` slots to observe transmission and cancellation.

use crate::protocol::Method;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Lifecycle state of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketState {
    /// Waiting in the queue for a connection
    Pending,
    /// The frame has been written to the stream
    Sending,
    /// The caller gave up on the request
    Cancelled,
    /// A reply settled the request
    Replied,
}

impl PacketState {
    /// Terminal states admit no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, PacketState::Cancelled | PacketState::Replied)
    }
}

struct PacketShared {
    state: PacketState,
    timeout: Option<Duration>,
    send_tx: Option<oneshot::Sender<()>>,
    send_rx: Option<oneshot::Receiver<()>>,
    cancel_tx: Option<oneshot::Sender<()>>,
    cancel_rx: Option<oneshot::Receiver<()>>,
}

/// Envelope around one outbound [`Method`]
///
/// Cheap to clone; all clones share the same lifecycle state.
#[derive(Clone)]
pub struct Packet {
    id: u32,
    method: Arc<Method>,
    shared: Arc<Mutex<PacketShared>>,
}

impl Packet {
    /// Wrap a method in a fresh packet
    pub fn new(method: Method) -> Self {
        let (send_tx, send_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        Self {
            id: method.id.unwrap_or_default(),
            method: Arc::new(method),
            shared: Arc::new(Mutex::new(PacketShared {
                state: PacketState::Pending,
                timeout: None,
                send_tx: Some(send_tx),
                send_rx: Some(send_rx),
                cancel_tx: Some(cancel_tx),
                cancel_rx: Some(cancel_rx),
            })),
        }
    }

    /// Set a per-packet reply timeout overriding the socket default
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.shared.lock().timeout = Some(timeout);
        self
    }

    /// The method id this packet is keyed by
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The wrapped method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Current lifecycle state
    pub fn state(&self) -> PacketState {
        self.shared.lock().state
    }

    /// Whether the caller has cancelled this packet
    pub fn is_cancelled(&self) -> bool {
        self.state() == PacketState::Cancelled
    }

    /// The reply timeout for this packet, falling back to `default`
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.shared.lock().timeout.unwrap_or(default)
    }

    /// Transition to a new state; terminal states are never left
    pub(crate) fn set_state(&self, state: PacketState) {
        let mut shared = self.shared.lock();
        if shared.state.is_terminal() {
            debug!(
                id = self.id,
                ?state,
                current = ?shared.state,
                "ignoring transition out of a terminal packet state"
            );
            return;
        }
        shared.state = state;
    }

    /// Cancel the request
    ///
    /// Idempotent. Fires the one-shot cancel slot so both the socket and
    /// the pending future observe it; a reply arriving afterwards is
    /// dropped on the floor.
    pub fn cancel(&self) {
        let cancel_tx = {
            let mut shared = self.shared.lock();
            if shared.state.is_terminal() {
                return;
            }
            shared.state = PacketState::Cancelled;
            shared.cancel_tx.take()
        };
        debug!(id = self.id, "packet cancelled");
        if let Some(tx) = cancel_tx {
            let _ = tx.send(());
        }
    }

    /// Mark the frame as written and fire the one-shot send slot
    pub(crate) fn mark_sent(&self) {
        let send_tx = {
            let mut shared = self.shared.lock();
            if shared.state.is_terminal() {
                return;
            }
            shared.state = PacketState::Sending;
            shared.send_tx.take()
        };
        if let Some(tx) = send_tx {
            let _ = tx.send(());
        }
    }

    /// Serializable form of the method, stamped with the sequence number
    pub(crate) fn stamp(&self, seq: u32) -> Method {
        let mut method = (*self.method).clone();
        method.seq = Some(seq);
        method
    }

    /// Take the one-shot send slot (resolves when the frame hits the wire)
    pub(crate) fn subscribe_send(&self) -> Option<oneshot::Receiver<()>> {
        self.shared.lock().send_rx.take()
    }

    /// Take the one-shot cancel slot
    pub(crate) fn subscribe_cancel(&self) -> Option<oneshot::Receiver<()>> {
        self.shared.lock().cancel_rx.take()
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.id)
            .field("method", &self.method.method)
            .field("state", &self.state())
            .finish()
    }
}
