//! Named request slots.
//!
//! A slot is the bookkeeping for one asynchronous request started under a
//! caller-chosen name. Slot names are case-insensitive and unique within a
//! [`Multiplexer`].
//!
//! # Lifecycle
//!
//! ```text
//!   start(name) ──► Pending ──(transport finishes)──► Success
//!        │             │                              TransportError(code)
//!        │             │                                     │
//!        │             └──── free(name): abort, keep data ───┤
//!        │                                                   ▼
//!        └─(refused by transport)──► TransportError ──► erase(name): gone
//!
//!   emulate(name, body) ──────────────────────────────► Success (no handle)
//! ```
//!
//! On-complete hooks (mode 0) fire once, when the multiplexer observes the
//! completion. Finishers (mode 1) and transforms (mode 2) run in push order
//! on the first [`Multiplexer::fetch_results`] and their output is stored.
//!
//! # Example
//!
//! ```ignore
//! use chmux::slot::{hook, Multiplexer, Wait};
//! use chmux::transport::RequestDescriptor;
//!
//! let mut mux = Multiplexer::from_settings(&settings)?;
//! mux.start("q1", RequestDescriptor::query("SELECT 1 FORMAT JSON"), hook::json())?;
//!
//! if let Wait::Resolved(status) = mux.wait_ready(Some("q1")) {
//!     println!("{status:?}: {:?}", mux.fetch_results(Some("q1"))?);
//! }
//! mux.erase("q1", false)?;
//! ```

mod envelope;
mod error;
pub mod hook;
mod iter;
mod multiplexer;
mod registry;
mod state;
mod value;

pub use envelope::{EnvelopeOverrides, ResultEnvelope, STATUS_CONFLICT, STATUS_OK, STATUS_PENDING};
pub use error::{HookError, SlotError, SlotResult};
pub use hook::{Hook, HookBatch, Incremental, Step};
pub use iter::{FinishedSlots, SlotOutput};
pub use multiplexer::{Multiplexer, Wait};
pub use registry::HookRegistry;
pub use state::{normalize, SlotStatus};
pub use value::SlotValue;
