//! Pluggable seams and the error taxonomy
//!
//! - **ReconnectionPolicy**: control backoff between reconnection attempts
//! - **ReconnectChecker**: gate every (re)connection attempt
//! - **Error types**: preflight and interactive error families

pub mod checker;
pub mod error;
pub mod reconnect;

pub use checker::{NoChecker, ReconnectChecker};
pub use error::{InteractiveError, PreflightError, Result};
pub use reconnect::{ExponentialBackoff, FixedDelay, NeverReconnect, ReconnectionPolicy};
