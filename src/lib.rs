//! # chmux
//!
//! Named, concurrent requests against a ClickHouse-style HTTP interface.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Caller (single thread)                   │
//! │   start / push_hook / wait_ready / fetch_results / ...   │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [slot]
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Multiplexer                          │
//! │  named slots, hook queues, read/write targets, polling   │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [transport]
//! ┌─────────────────────────────────────────────────────────┐
//! │       Transport (HttpTransport / ScriptedTransport)      │
//! │  many operations in flight, batched completion reports   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Connection details and polling knobs come from [`config::Settings`].

pub mod config;
pub mod slot;
pub mod transport;

pub use config::{Settings, SettingsError};
pub use slot::{
    hook, EnvelopeOverrides, HookRegistry, Multiplexer, ResultEnvelope, SlotError, SlotOutput,
    SlotResult, SlotStatus, SlotValue, Wait,
};
pub use transport::{RequestDescriptor, Transport, TransportFailure};

/// Commonly used items.
pub mod prelude {
    pub use crate::slot::{
        hook, EnvelopeOverrides, Hook, HookError, HookRegistry, Multiplexer, ResultEnvelope,
        SlotError, SlotOutput, SlotResult, SlotStatus, SlotValue, Step, Wait,
    };
    pub use crate::transport::{RequestDescriptor, Transport, TransportFailure};
}
