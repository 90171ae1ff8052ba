//! Wire value types for the interactive JSON protocol
//!
//! Every frame on the stream is a JSON text message tagged by `type`:
//! `"method"` for requests and server pushes, `"reply"` for responses.
//! Both directions may stamp a `seq` field carrying the latest sequence
//! number the sender has observed.

use crate::traits::error::InteractiveError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

fn is_false(value: &bool) -> bool {
    !*value
}

/// An outbound request, or a server-initiated push
///
/// Requests built by the client always carry an `id` (assigned monotonically
/// per socket) and are stamped with the current sequence number just before
/// serialization. Pushes arriving from the server may omit both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    /// Identifier used to correlate the reply; absent on server pushes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,

    /// Name of the remote method
    pub method: String,

    /// Parameter object passed to the remote method
    #[serde(default)]
    pub params: Value,

    /// When true the caller does not want a reply
    #[serde(default, skip_serializing_if = "is_false")]
    pub discard: bool,

    /// Latest sequence number observed by the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
}

impl Method {
    /// Create a new outbound method call
    pub fn new(id: u32, method: impl Into<String>, params: Value, discard: bool) -> Self {
        Self {
            id: Some(id),
            method: method.into(),
            params,
            discard,
            seq: None,
        }
    }
}

/// Error object carried by a reply, or synthesized from a close code
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ProtocolError {
    pub code: i64,

    pub message: String,

    /// Dotted path to the offending parameter, when the server provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ProtocolError {
    /// Build an error from a stream close code and reason
    pub fn from_close(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: i64::from(code),
            message: reason.into(),
            path: None,
        }
    }
}

/// Reply to a previously sent [`Method`]
///
/// Exactly one of `result` / `error` is meaningful; the server sends the
/// other as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Id of the originating method
    pub id: u32,

    #[serde(default)]
    pub result: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
}

impl Reply {
    /// Convert into the settled outcome of the originating request
    pub fn into_result(self) -> Result<Value, InteractiveError> {
        match self.error {
            Some(err) => Err(InteractiveError::Protocol(err)),
            None => Ok(self.result),
        }
    }
}

/// A single frame on the stream
///
/// Inbound text is parsed into this sum exactly once and routed by variant:
/// replies settle pending packets, methods are surfaced as push events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Method(Method),
    Reply(Reply),
}

impl Frame {
    /// Parse a text frame
    ///
    /// Malformed JSON and unknown `type` tags both surface as
    /// [`InteractiveError::MessageParse`].
    pub fn parse(raw: &str) -> Result<Self, InteractiveError> {
        serde_json::from_str(raw).map_err(|e| InteractiveError::MessageParse(e.to_string()))
    }

    /// Serialize to the wire representation
    pub fn to_json(&self) -> Result<String, InteractiveError> {
        serde_json::to_string(self).map_err(|e| InteractiveError::MessageParse(e.to_string()))
    }

    /// Sequence number stamped on the frame, if any
    pub fn seq(&self) -> Option<u32> {
        match self {
            Frame::Method(m) => m.seq,
            Frame::Reply(r) => r.seq,
        }
    }
}
