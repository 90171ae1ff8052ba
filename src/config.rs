//! Socket configuration
//!
//! [`SocketOptions`] collects everything a [`Socket`](crate::socket::Socket)
//! needs to dial and maintain a stream: the URL, connect-time headers and
//! query parameters, the reply timeout, and the pluggable reconnection
//! policy and checker.

use crate::traits::checker::{NoChecker, ReconnectChecker};
use crate::traits::reconnect::{ExponentialBackoff, ReconnectionPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Protocol version advertised on every connection
pub const PROTOCOL_VERSION: &str = "2.0";

/// Header carrying the protocol version
pub const PROTOCOL_VERSION_HEADER: &str = "X-Protocol-Version";

/// Header carrying the interactive project version for game clients
pub const INTERACTIVE_VERSION_HEADER: &str = "X-Interactive-Version";

/// Default time to wait for a reply before failing the request
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on how long a packet may sit queued while disconnected
pub(crate) const QUEUED_SEND_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for a [`Socket`](crate::socket::Socket)
pub struct SocketOptions {
    pub(crate) url: String,
    pub(crate) auth_token: Option<String>,
    pub(crate) extra_headers: Vec<(String, String)>,
    pub(crate) query_params: HashMap<String, String>,
    pub(crate) reply_timeout: Duration,
    pub(crate) preflight_enabled: bool,
    pub(crate) policy: Box<dyn ReconnectionPolicy>,
    pub(crate) checker: Arc<dyn ReconnectChecker>,
}

impl SocketOptions {
    /// Start building options for the given stream URL (`ws://` or `wss://`)
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            extra_headers: Vec::new(),
            query_params: HashMap::new(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            preflight_enabled: true,
            policy: Box::<ExponentialBackoff>::default(),
            checker: Arc::new(NoChecker),
        }
    }

    /// Send `Authorization: Bearer <token>` on every connection
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Add a connect-time header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((key.into(), value.into()));
        self
    }

    /// Add a query parameter, overriding any same-named one in the URL
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    /// Time to wait for a reply before failing a request (default 10s)
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Enable or disable the HTTP preflight probe (default: enabled)
    ///
    /// While enabled the probe runs before every connection and
    /// reconnection attempt.
    pub fn preflight(mut self, enabled: bool) -> Self {
        self.preflight_enabled = enabled;
        self
    }

    /// Replace the reconnection policy (default: [`ExponentialBackoff`])
    pub fn reconnection_policy(mut self, policy: impl ReconnectionPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Gate every (re)connection attempt through a checker
    pub fn reconnect_checker(mut self, checker: impl ReconnectChecker + 'static) -> Self {
        self.checker = Arc::new(checker);
        self
    }

    /// The configured stream URL
    pub fn url(&self) -> &str {
        &self.url
    }
}
