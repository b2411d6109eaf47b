//! Lazy iteration over slots as they finish.

use std::collections::{HashSet, VecDeque};

use super::envelope::ResultEnvelope;
use super::error::{SlotError, SlotResult};
use super::multiplexer::{Multiplexer, Wait};
use super::value::SlotValue;

/// What [`FinishedSlots`] yields for each slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutput {
    /// The raw envelope (hooks not applied).
    Envelope(ResultEnvelope),
    /// The hook-processed value.
    Value(SlotValue),
}

impl SlotOutput {
    pub fn envelope(&self) -> Option<&ResultEnvelope> {
        match self {
            Self::Envelope(envelope) => Some(envelope),
            Self::Value(_) => None,
        }
    }

    pub fn into_value(self) -> Option<SlotValue> {
        match self {
            Self::Value(value) => Some(value),
            Self::Envelope(_) => None,
        }
    }
}

/// Iterator returned by [`Multiplexer::iterate_finished`].
///
/// Blocks in `next` while slots are still running. Ends once every slot
/// seen at construction has been yielded, or the transport has no work
/// left that could resolve the rest.
pub struct FinishedSlots<'a> {
    mux: &'a mut Multiplexer,
    ready: VecDeque<String>,
    pending: HashSet<String>,
    apply_hooks: bool,
}

impl<'a> FinishedSlots<'a> {
    pub(crate) fn new(mux: &'a mut Multiplexer, apply_hooks: bool) -> Self {
        let (ready, pending) = mux.iteration_state();
        Self {
            mux,
            ready,
            pending,
            apply_hooks,
        }
    }

    fn emit(&mut self, name: String) -> SlotResult<(String, SlotOutput)> {
        if self.apply_hooks {
            let value = self.mux.fetch_results(Some(name.as_str()))?;
            return Ok((name, SlotOutput::Value(value)));
        }
        let envelope = self
            .mux
            .envelope(&name)
            .cloned()
            .ok_or_else(|| SlotError::UnknownSlot(name.clone()))?;
        Ok((name, SlotOutput::Envelope(envelope)))
    }
}

impl Iterator for FinishedSlots<'_> {
    type Item = SlotResult<(String, SlotOutput)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(name) = self.ready.pop_front() {
                return Some(self.emit(name));
            }
            if self.pending.is_empty() {
                return None;
            }
            match self.mux.wait_ready(None) {
                Wait::Changed(names) => {
                    for name in names {
                        if self.pending.remove(&name) {
                            self.ready.push_back(name);
                        }
                    }
                }
                Wait::Resolved(_) | Wait::Idle => return None,
            }
        }
    }
}
