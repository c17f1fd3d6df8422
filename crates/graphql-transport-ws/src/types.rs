//! Core type definitions shared by every loop.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Normal closure, used when the client closes the socket itself.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Abnormal closure, reported when a socket dies without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// No status code was present in the close frame.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close codes after which reconnecting would only repeat the violation.
///
/// - `1002` unsupported WebSocket sub-protocol
/// - `4400` invalid message format from the client
/// - `4401` subscribe received before connection init
/// - `4409` duplicate subscription id
/// - `4429` too many initialization requests
pub const FATAL_CLOSE_CODES: [u16; 5] = [1002, 4400, 4401, 4409, 4429];

/// Unique identifier of a caller operation.
/// Uses ULID for lexicographically sortable, unique IDs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Generate a new unique operation ID using ULID.
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OperationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A socket close as reported by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseEvent {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason, possibly empty.
    pub reason: String,
}

impl CloseEvent {
    /// Create a close event.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Close event for a socket that went away without a close frame.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(ABNORMAL_CLOSURE, reason)
    }

    /// Returns true if the code forbids reconnecting.
    pub fn is_fatal(&self) -> bool {
        FATAL_CLOSE_CODES.contains(&self.code)
    }
}

impl fmt::Display for CloseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "code {}: {}", self.code, self.reason)
        }
    }
}
