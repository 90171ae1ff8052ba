//! # interlink
//!
//! A reliable, reconnecting request/reply transport over a persistent
//! WebSocket stream, for interactive realtime sessions.
//!
//! ## Features
//!
//! - **Typed preflight**: an HTTP probe of the stream endpoint surfaces
//!   authentication and routing errors before the opaque handshake
//! - **Reconnect loop**: pluggable backoff policies, recoverable-close
//!   classification, cancellable timers
//! - **Request/reply correlation**: per-packet timeouts and cancellation
//!   over a sequence-numbered JSON frame protocol
//! - **Single-owner driver**: one task owns the stream; state inspection is
//!   lock-free and never suspends
//!
//! ## Example
//!
//! ```rust,ignore
//! use interlink::{Client, SocketOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> interlink::Result<()> {
//!     let client = Client::game(
//!         467624,
//!         SocketOptions::new("wss://interactive.example.com/gameClient")
//!             .auth_token(std::env::var("TOKEN").unwrap_or_default()),
//!     );
//!
//!     client.open().await?;
//!     client.execute("ready", json!({"isReady": true}), false).await?;
//!
//!     while let Some(event) = client.try_recv_event() {
//!         println!("Event: {:?}", event);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod traits;

pub mod client;
pub mod config;
pub mod connection_state;
pub mod packet;
pub mod preflight;
pub mod protocol;
pub mod socket;

// Re-export all traits and error types
pub use traits::*;

// Re-export core functionality
pub use client::{Client, ClientRole};
pub use config::{SocketOptions, DEFAULT_REPLY_TIMEOUT, PROTOCOL_VERSION};
pub use connection_state::{AtomicMetrics, AtomicSocketState, Metrics, SocketState};
pub use packet::{Packet, PacketState};
pub use preflight::{preflight, probe_url};
pub use protocol::{Frame, Method, ProtocolError, Reply};
pub use socket::{Socket, SocketEvent};
