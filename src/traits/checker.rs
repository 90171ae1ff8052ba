use crate::traits::error::Result;
use async_trait::async_trait;

/// Trait for gating connection attempts
///
/// The checker is awaited before every connection and reconnection attempt.
/// It can delay the attempt (by taking its time to resolve) or veto it
/// entirely (by returning an error), which ends the reconnect cycle.
///
/// # Use Cases
/// - Waiting for an auth token refresh before redialing
/// - Holding reconnects while the application is backgrounded
/// - Circuit-breaking after repeated server-side rejections
#[async_trait]
pub trait ReconnectChecker: Send + Sync {
    /// Decide whether the upcoming connection attempt may proceed
    async fn check(&self) -> Result<()>;
}

/// A no-op checker that always allows the attempt
pub struct NoChecker;

#[async_trait]
impl ReconnectChecker for NoChecker {
    async fn check(&self) -> Result<()> {
        Ok(())
    }
}
