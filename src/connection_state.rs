//! Lock-free socket state and metrics
//!
//! State inspection must never suspend, so both the lifecycle state and the
//! counters live in plain atomics shared between the socket handle and its
//! driver task.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Connection lifecycle state of a [`Socket`](crate::socket::Socket)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketState {
    /// No stream and no connection attempt in progress
    Idle = 0,
    /// A connection attempt is in progress
    Connecting = 1,
    /// The stream is open
    Connected = 2,
    /// A close was requested and the stream is shutting down
    Closing = 3,
    /// Waiting out the backoff delay before the next attempt
    Reconnecting = 4,
    /// A connect arrived while closing; reopening once the close completes
    Refreshing = 5,
}

impl SocketState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SocketState::Connecting,
            2 => SocketState::Connected,
            3 => SocketState::Closing,
            4 => SocketState::Reconnecting,
            5 => SocketState::Refreshing,
            _ => SocketState::Idle,
        }
    }
}

/// Atomic wrapper around [`SocketState`]
pub struct AtomicSocketState(AtomicU8);

impl AtomicSocketState {
    pub fn new(state: SocketState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn get(&self) -> SocketState {
        SocketState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, state: SocketState) {
        self.0.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.get() == SocketState::Idle
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.get() == SocketState::Connected
    }

    /// Whether some connection attempt is underway (initial or retry)
    #[inline]
    pub fn is_connecting(&self) -> bool {
        matches!(
            self.get(),
            SocketState::Connecting | SocketState::Reconnecting | SocketState::Refreshing
        )
    }
}

/// Atomic counters updated by the driver task
#[derive(Default)]
pub struct AtomicMetrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    reconnect_count: AtomicU64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_reconnects(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct Metrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub reconnect_count: u64,
    pub state: SocketState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_the_atomic() {
        let state = AtomicSocketState::new(SocketState::Idle);
        for s in [
            SocketState::Connecting,
            SocketState::Connected,
            SocketState::Closing,
            SocketState::Reconnecting,
            SocketState::Refreshing,
            SocketState::Idle,
        ] {
            state.set(s);
            assert_eq!(state.get(), s);
        }
    }

    #[test]
    fn connecting_predicate_covers_retry_states() {
        let state = AtomicSocketState::new(SocketState::Reconnecting);
        assert!(state.is_connecting());
        state.set(SocketState::Refreshing);
        assert!(state.is_connecting());
        state.set(SocketState::Connected);
        assert!(!state.is_connecting());
        assert!(state.is_connected());
    }

    #[test]
    fn metrics_count_up() {
        let metrics = AtomicMetrics::new();
        metrics.increment_sent();
        metrics.increment_sent();
        metrics.increment_received();
        metrics.increment_reconnects();
        assert_eq!(metrics.messages_sent(), 2);
        assert_eq!(metrics.messages_received(), 1);
        assert_eq!(metrics.reconnect_count(), 1);
    }
}
