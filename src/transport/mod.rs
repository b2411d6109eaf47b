//! Transport layer.
//!
//! A transport runs many requests at once under one shared context and
//! reports finished operations in batches. The slot multiplexer drives it
//! through the [`Transport`] trait and never looks at the wire format.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Multiplexer (caller thread)                 │
//! │  submit() ──► OperationId      drain() ◄── Vec<Completion>      │
//! │  close(id)    teardown()       wait(timeout) ─► Readiness       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        HttpTransport (tokio runtime, created lazily)            │
//! │  - one spawned task per request (reqwest)                       │
//! │  - completions funnelled through an mpsc channel                │
//! │  - close() aborts the task, teardown() drops the runtime        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`ScriptedTransport`] implements the same trait without any I/O so tests
//! can decide exactly when and how each operation finishes.

mod error;
mod http;
mod request;
pub mod scripted;

pub use error::{codes, TransportFailure};
pub use http::HttpTransport;
pub use request::{HttpMethod, RequestDescriptor};
pub use scripted::{Reply, ScriptedTransport};

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Map, Value};

/// Transport-level introspection values (timings, sizes, http code).
pub type Metadata = Map<String, Value>;

/// Identity of one operation inside a transport context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Result of waiting on the transport's readiness primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one completion can be drained.
    Ready,
    /// The timeout elapsed without activity.
    TimedOut,
    /// No readiness primitive is usable; the caller should sleep briefly.
    Unsupported,
}

/// A finished operation as reported by [`Transport::drain`].
#[derive(Debug, Clone)]
pub struct Completion {
    pub id: OperationId,
    pub outcome: Result<(), TransportFailure>,
    /// Protocol status code (0 when the exchange never got that far).
    pub http_status: u16,
    pub body: Bytes,
    pub header_lines: Vec<String>,
    pub metadata: Metadata,
}

impl Completion {
    /// A completed exchange with a protocol status and payload.
    pub fn success(id: OperationId, http_status: u16, body: impl Into<Bytes>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("http_code".to_string(), Value::from(http_status));
        Self {
            id,
            outcome: Ok(()),
            http_status,
            body: body.into(),
            header_lines: Vec::new(),
            metadata,
        }
    }

    /// An exchange that failed at the transport level.
    pub fn failure(id: OperationId, failure: TransportFailure) -> Self {
        Self {
            id,
            outcome: Err(failure),
            http_status: 0,
            body: Bytes::new(),
            header_lines: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_headers(mut self, header_lines: Vec<String>) -> Self {
        self.header_lines = header_lines;
        self
    }

    /// Merge transport metadata into the completion.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }
}

/// The "many simultaneous operations" primitive consumed by the multiplexer.
///
/// All methods are called from the multiplexer's single thread of control.
pub trait Transport {
    /// Register one request for asynchronous execution.
    ///
    /// The shared context is created on first use.
    fn submit(&mut self, request: RequestDescriptor) -> Result<OperationId, TransportFailure>;

    /// Collect operations that finished since the last call, without blocking.
    ///
    /// Returned operations no longer count as running.
    fn drain(&mut self) -> Vec<Completion>;

    /// Block until a completion is available or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> Readiness;

    /// Number of submitted operations not yet drained or closed.
    fn running(&self) -> usize;

    /// Release one operation, aborting it if still in flight.
    fn close(&mut self, id: OperationId);

    /// Drop the shared context. Later polls report no outstanding work.
    fn teardown(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn submit(&mut self, request: RequestDescriptor) -> Result<OperationId, TransportFailure> {
        (**self).submit(request)
    }

    fn drain(&mut self) -> Vec<Completion> {
        (**self).drain()
    }

    fn wait(&mut self, timeout: Duration) -> Readiness {
        (**self).wait(timeout)
    }

    fn running(&self) -> usize {
        (**self).running()
    }

    fn close(&mut self, id: OperationId) {
        (**self).close(id)
    }

    fn teardown(&mut self) {
        (**self).teardown()
    }
}
