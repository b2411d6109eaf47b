//! Transport-level failure type.

use thiserror::Error;

/// Failure codes reported by the shipped transports.
///
/// The numbering follows libcurl so codes stay comparable with other
/// clients of the same server.
pub mod codes {
    /// The request could not be built (bad URL, bad header).
    pub const URL_MALFORMAT: i32 = 3;
    /// Could not connect to the server.
    pub const COULDNT_CONNECT: i32 = 7;
    /// The transport context could not be created.
    pub const FAILED_INIT: i32 = 2;
    /// The operation timed out.
    pub const OPERATION_TIMEDOUT: i32 = 28;
    /// The operation was aborted by the client.
    pub const ABORTED_BY_CALLBACK: i32 = 42;
    /// Failure receiving network data.
    pub const RECV_ERROR: i32 = 56;
}

/// A request failed below the protocol level.
///
/// Failures are recorded in the slot's status and envelope; the multiplexer
/// never raises them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport error {code}: {message}")]
pub struct TransportFailure {
    /// Numeric failure code (see [`codes`]).
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl TransportFailure {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Check if the operation ran out of time.
    pub fn is_timeout(&self) -> bool {
        self.code == codes::OPERATION_TIMEDOUT
    }

    /// Check if the operation was aborted locally.
    pub fn is_aborted(&self) -> bool {
        self.code == codes::ABORTED_BY_CALLBACK
    }
}
