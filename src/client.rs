//! Thin client facade over [`Socket`]
//!
//! The facade fixes the client's role at construction time. Game clients
//! publish scenes and controls and must advertise which interactive project
//! version they serve; participant clients react to what the game
//! publishes. Higher-level RPC surfaces are thin callers of
//! [`Client::execute`] and live outside this crate.

use crate::config::{SocketOptions, INTERACTIVE_VERSION_HEADER};
use crate::connection_state::{Metrics, SocketState};
use crate::packet::Packet;
use crate::socket::{Socket, SocketEvent};
use crate::traits::error::Result;
use serde_json::Value;

/// Role of a connected client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    /// Publishes scenes and controls
    GameClient,
    /// Reacts to what the game publishes
    ParticipantClient,
}

/// Interactive RPC client
pub struct Client {
    role: ClientRole,
    socket: Socket,
}

impl Client {
    /// Create a game client serving the given interactive project version
    pub fn game(version_id: u64, options: SocketOptions) -> Self {
        let options = options.header(INTERACTIVE_VERSION_HEADER, version_id.to_string());
        Self {
            role: ClientRole::GameClient,
            socket: Socket::new(options),
        }
    }

    /// Create a participant client
    pub fn participant(options: SocketOptions) -> Self {
        Self {
            role: ClientRole::ParticipantClient,
            socket: Socket::new(options),
        }
    }

    /// The role this client was constructed with
    pub fn role(&self) -> ClientRole {
        self.role
    }

    /// Open the connection
    pub async fn open(&self) -> Result<()> {
        self.socket.connect().await
    }

    /// Close the connection, cancelling every queued request
    pub async fn close(&self) {
        self.socket.close().await;
    }

    /// Call a named remote method and await its result
    pub async fn execute(
        &self,
        method: impl Into<String>,
        params: Value,
        discard: bool,
    ) -> Result<Value> {
        self.socket.execute(method, params, discard).await
    }

    /// Build a packet for a remote call without sending it yet
    pub fn prepare(&self, method: impl Into<String>, params: Value, discard: bool) -> Packet {
        self.socket.prepare(method, params, discard)
    }

    /// Send a previously prepared packet
    pub async fn send(&self, packet: Packet) -> Result<Value> {
        self.socket.send(packet).await
    }

    /// A receiver for connection events and server-pushed methods
    pub fn events(&self) -> crossbeam_channel::Receiver<SocketEvent> {
        self.socket.events()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<SocketEvent> {
        self.socket.try_recv_event()
    }

    /// Receive an event (blocking)
    pub fn recv_event(&self) -> std::result::Result<SocketEvent, crossbeam_channel::RecvError> {
        self.socket.recv_event()
    }

    /// Current connection state
    pub fn state(&self) -> SocketState {
        self.socket.state()
    }

    /// Point-in-time metrics snapshot
    pub fn metrics(&self) -> Metrics {
        self.socket.metrics()
    }

    /// The underlying socket, for advanced use
    pub fn socket(&self) -> &Socket {
        &self.socket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roles_are_fixed_at_construction() {
        let game = Client::game(1234, SocketOptions::new("ws://localhost/game"));
        assert_eq!(game.role(), ClientRole::GameClient);

        let participant = Client::participant(SocketOptions::new("ws://localhost/participant"));
        assert_eq!(participant.role(), ClientRole::ParticipantClient);
    }

    #[tokio::test]
    async fn new_client_starts_idle() {
        let client = Client::participant(SocketOptions::new("ws://localhost/participant"));
        assert_eq!(client.state(), SocketState::Idle);
        assert_eq!(client.socket().queue_size(), 0);
    }
}
