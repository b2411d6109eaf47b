//! Bookkeeping for one named slot.

use std::collections::VecDeque;

use serde_json::Value;

use super::envelope::ResultEnvelope;
use super::hook::{Hook, OnCompleteFn};
use super::value::SlotValue;
use crate::transport::OperationId;

/// Lifecycle state of a slot.
///
/// Moves only from `Pending` to one of the resolved states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Pending,
    Success,
    /// The transport failed with this code.
    TransportError(i32),
}

impl SlotStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_resolved(&self) -> bool {
        !self.is_pending()
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Normalize a slot name for storage and lookup.
pub fn normalize(name: &str) -> String {
    name.to_lowercase()
}

#[derive(Debug)]
pub(crate) struct Slot {
    /// Live transport operation; `None` once freed or for emulated slots.
    pub(crate) handle: Option<OperationId>,
    pub(crate) status: SlotStatus,
    pub(crate) envelope: Option<ResultEnvelope>,
    /// Current value, seeded from the envelope body on first use.
    pub(crate) result: Option<SlotValue>,
    pub(crate) hooks: VecDeque<Hook>,
    /// Position in the multiplexer's observed completion order.
    pub(crate) completed_at: Option<u64>,
}

impl Slot {
    pub(crate) fn started(handle: OperationId, hooks: Vec<Hook>) -> Self {
        Self {
            handle: Some(handle),
            status: SlotStatus::Pending,
            envelope: None,
            result: None,
            hooks: hooks.into(),
            completed_at: None,
        }
    }

    /// A slot whose request never reached the transport.
    pub(crate) fn rejected(envelope: ResultEnvelope, code: i32, hooks: Vec<Hook>) -> Self {
        Self {
            handle: None,
            status: SlotStatus::TransportError(code),
            envelope: Some(envelope),
            result: None,
            hooks: hooks.into(),
            completed_at: None,
        }
    }

    pub(crate) fn emulated(envelope: ResultEnvelope, result: SlotValue) -> Self {
        Self {
            handle: None,
            status: SlotStatus::Success,
            envelope: Some(envelope),
            result: Some(result),
            hooks: VecDeque::new(),
            completed_at: None,
        }
    }

    /// Record the outcome of the request. Returns false if already resolved.
    pub(crate) fn resolve(&mut self, status: SlotStatus, envelope: ResultEnvelope) -> bool {
        if self.status.is_resolved() || status.is_pending() {
            return false;
        }
        self.status = status;
        self.envelope = Some(envelope);
        true
    }

    pub(crate) fn is_live(&self) -> bool {
        self.handle.is_some()
    }

    /// Resolved and no longer holding a transport operation.
    pub(crate) fn is_erasable(&self) -> bool {
        self.status.is_resolved() && !self.is_live()
    }

    /// Remove the queued on-complete hooks, keeping the others in order.
    pub(crate) fn take_on_complete(&mut self) -> Vec<(OnCompleteFn, Option<Value>)> {
        let mut fired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.hooks.len());
        for hook in self.hooks.drain(..) {
            match hook {
                Hook::OnComplete { callback, param } => fired.push((callback, param)),
                other => kept.push_back(other),
            }
        }
        self.hooks = kept;
        fired
    }
}
