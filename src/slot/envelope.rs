//! Immutable record of one request's outcome.

use bytes::Bytes;
use serde_json::Value;

use crate::transport::{Completion, Metadata, TransportFailure};

/// Status of a slot whose request is still running.
pub const STATUS_PENDING: u16 = 102;
/// Status of a rejected start (name already taken).
pub const STATUS_CONFLICT: u16 = 417;
/// Default status of an emulated slot.
pub const STATUS_OK: u16 = 200;

/// Snapshot of a completed request.
///
/// Produced once per slot completion and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    status: u16,
    transport_error: String,
    body: Bytes,
    header_lines: Vec<String>,
    transport_metadata: Metadata,
}

/// Values used by `Multiplexer::emulate` instead of a real exchange.
///
/// Unset fields take the defaults of a successful exchange: status 200,
/// no transport error, metadata `{"status": <status>}`.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeOverrides {
    pub status: Option<u16>,
    pub transport_error: Option<String>,
    pub header_lines: Vec<String>,
    pub transport_metadata: Option<Metadata>,
}

impl EnvelopeOverrides {
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn transport_error(mut self, message: impl Into<String>) -> Self {
        self.transport_error = Some(message.into());
        self
    }

    pub fn header(mut self, line: impl Into<String>) -> Self {
        self.header_lines.push(line.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.transport_metadata = Some(metadata);
        self
    }
}

/// Metadata recorded when a request failed below the protocol level.
fn failure_metadata() -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("http_code".to_string(), Value::from(0));
    metadata
}

impl ResultEnvelope {
    /// Acknowledgement returned by a successful start.
    pub fn pending() -> Self {
        Self {
            status: STATUS_PENDING,
            transport_error: String::new(),
            body: Bytes::new(),
            header_lines: Vec::new(),
            transport_metadata: Metadata::new(),
        }
    }

    /// Envelope for a request the transport refused to register.
    pub fn from_failure(failure: &TransportFailure) -> Self {
        Self {
            status: 0,
            transport_error: failure.to_string(),
            body: Bytes::new(),
            header_lines: Vec::new(),
            transport_metadata: failure_metadata(),
        }
    }

    pub(crate) fn from_completion(completion: Completion) -> Self {
        match completion.outcome {
            Ok(()) => Self {
                status: completion.http_status,
                transport_error: String::new(),
                body: completion.body,
                header_lines: completion.header_lines,
                transport_metadata: completion.metadata,
            },
            Err(failure) => Self {
                status: completion.http_status,
                transport_error: failure.to_string(),
                body: completion.body,
                header_lines: completion.header_lines,
                transport_metadata: failure_metadata(),
            },
        }
    }

    pub(crate) fn emulated(body: Bytes, overrides: EnvelopeOverrides) -> Self {
        let status = overrides.status.unwrap_or(STATUS_OK);
        let transport_metadata = overrides.transport_metadata.unwrap_or_else(|| {
            let mut metadata = Metadata::new();
            metadata.insert("status".to_string(), Value::from(status));
            metadata
        });
        Self {
            status,
            transport_error: overrides.transport_error.unwrap_or_default(),
            body,
            header_lines: overrides.header_lines,
            transport_metadata,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Empty when the transport reported no failure.
    pub fn transport_error(&self) -> &str {
        &self.transport_error
    }

    pub fn has_transport_error(&self) -> bool {
        !self.transport_error.is_empty()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn header_lines(&self) -> &[String] {
        &self.header_lines
    }

    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_lines.iter().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.transport_metadata
    }
}
