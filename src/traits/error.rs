use crate::protocol::ProtocolError;
use thiserror::Error;

/// Typed error raised by the HTTP preflight probe
///
/// The probe converts opaque WebSocket handshake rejections into errors a
/// caller can dispatch on. Statuses 400, 401, 404, 409 and 500 have a
/// registered variant; everything else maps to [`PreflightError::Generic`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreflightError {
    /// HTTP 400 with a body other than the upgrade sentinel
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// HTTP 401
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP 404
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP 409
    #[error("Conflict: {0}")]
    Conflict(String),

    /// HTTP 500
    #[error("Internal server error: {0}")]
    InternalServer(String),

    /// Any other HTTP status
    #[error("Preflight failed with status {status}: {message}")]
    Generic { status: u16, message: String },

    /// The probe itself could not complete (DNS, TCP, TLS)
    #[error("Preflight transport error: {0}")]
    Transport(String),
}

impl PreflightError {
    /// Look up the error registered for an HTTP status code
    ///
    /// The response body is carried as the error message.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            400 => Self::BadRequest(message),
            401 => Self::Unauthorized(message),
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            500 => Self::InternalServer(message),
            _ => Self::Generic { status, message },
        }
    }

    /// The HTTP status code this error was built from
    ///
    /// `None` for transport-level failures, which never saw a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::BadRequest(_) => Some(400),
            Self::Unauthorized(_) => Some(401),
            Self::NotFound(_) => Some(404),
            Self::Conflict(_) => Some(409),
            Self::InternalServer(_) => Some(500),
            Self::Generic { status, .. } => Some(*status),
            Self::Transport(_) => None,
        }
    }

    /// The response body (or I/O description) carried by this error
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::InternalServer(m)
            | Self::Transport(m) => m,
            Self::Generic { message, .. } => message,
        }
    }

    /// Whether the socket may retry the connection attempt after this error
    ///
    /// Only probe-level I/O failures are transient; every typed HTTP
    /// classification is final for the attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Main error type for interlink
#[derive(Error, Debug, Clone)]
pub enum InteractiveError {
    /// The pre-connection HTTP probe failed
    #[error(transparent)]
    Preflight(#[from] PreflightError),

    /// Error reply from the server, or a non-recoverable close code
    #[error("Protocol error {}: {}", .0.code, .0.message)]
    Protocol(ProtocolError),

    /// Frame that could not be parsed as a known message
    #[error("Message parse error: {0}")]
    MessageParse(String),

    /// No reply arrived within the packet timeout
    #[error("Request timed out")]
    Timeout,

    /// The packet was cancelled, or the socket closed while it was pending
    #[error("Request cancelled")]
    Cancelled,

    /// Underlying WebSocket transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Result type for interlink operations
pub type Result<T> = std::result::Result<T, InteractiveError>;
