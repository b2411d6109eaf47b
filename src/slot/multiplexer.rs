//! The slot multiplexer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::thread;
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::envelope::{EnvelopeOverrides, ResultEnvelope};
use super::error::{SlotError, SlotResult};
use super::hook::{Hook, HookBatch};
use super::iter::FinishedSlots;
use super::state::{normalize, Slot, SlotStatus};
use super::value::SlotValue;
use crate::config::{MultiplexerSettings, Settings, SettingsError};
use crate::transport::{
    Completion, HttpTransport, OperationId, Readiness, RequestDescriptor, Transport,
};

/// Outcome of [`Multiplexer::wait_ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wait {
    /// The named slot is resolved with this status.
    Resolved(SlotStatus),
    /// These slots changed status during the wait, in observed order.
    Changed(Vec<String>),
    /// No transport work is outstanding; nothing more will change.
    Idle,
}

impl Wait {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Owner of all slots of one client.
///
/// Requests are started under a name, run concurrently inside the
/// transport, and are collected later by name, by "whichever finishes
/// first", or through [`iterate_finished`](Self::iterate_finished).
///
/// The multiplexer is single-threaded: every operation runs on the caller's
/// thread and only [`wait_ready`](Self::wait_ready) (and the operations
/// built on it) block.
///
/// # Example
///
/// ```ignore
/// use chmux::{hook, Multiplexer, RequestDescriptor};
///
/// let mut mux = Multiplexer::from_settings(&Settings::load()?)?;
/// mux.start("hits", RequestDescriptor::query("SELECT count() FROM hits FORMAT JSON"), vec![
///     hook::json(),
///     hook::field("data"),
/// ])?;
/// mux.start("users", RequestDescriptor::query("SELECT uniq(user) FROM hits"), vec![])?;
///
/// for item in mux.iterate_finished(true) {
///     let (name, output) = item?;
///     println!("{name}: {output:?}");
/// }
/// ```
pub struct Multiplexer {
    transport: Box<dyn Transport>,
    slots: HashMap<String, Slot>,
    /// Slot names in registration order.
    order: Vec<String>,
    /// Operations whose completion has not been observed yet.
    operations: HashMap<OperationId, String>,
    /// Number of slot resolutions observed so far.
    resolutions: u64,
    read_target: Option<String>,
    write_target: Option<String>,
    settings: MultiplexerSettings,
}

impl Multiplexer {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_settings(transport, MultiplexerSettings::default())
    }

    pub fn with_settings(transport: impl Transport + 'static, settings: MultiplexerSettings) -> Self {
        Self {
            transport: Box::new(transport),
            slots: HashMap::new(),
            order: Vec::new(),
            operations: HashMap::new(),
            resolutions: 0,
            read_target: None,
            write_target: None,
            settings,
        }
    }

    /// Build a multiplexer over an [`HttpTransport`] described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        settings.validate()?;
        let transport = HttpTransport::from_settings(&settings.server)?;
        Ok(Self::with_settings(transport, settings.multiplexer.clone()))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start a named slot for `request`.
    ///
    /// Returns an acknowledgement envelope with status 102. If the transport
    /// refuses the request outright, the slot is still created, resolved with
    /// the transport error, and the returned envelope carries the failure.
    ///
    /// # Errors
    ///
    /// - `Conflict` if a slot with this name (case-insensitive) exists.
    /// - `MalformedHook` if the hook batch is rejected; no slot is created.
    pub fn start(
        &mut self,
        name: &str,
        request: RequestDescriptor,
        hooks: impl Into<HookBatch>,
    ) -> SlotResult<ResultEnvelope> {
        let key = normalize(name);
        if self.slots.contains_key(&key) {
            debug!(slot = %key, "start rejected, name in use");
            return Err(SlotError::Conflict(key));
        }
        let hooks: HookBatch = hooks.into();
        let hooks = hooks.validate()?;

        match self.transport.submit(request) {
            Ok(id) => {
                debug!(slot = %key, op = %id, hooks = hooks.len(), "slot started");
                self.operations.insert(id, key.clone());
                self.insert(key, Slot::started(id, hooks));
                Ok(ResultEnvelope::pending())
            }
            Err(failure) => {
                warn!(slot = %key, code = failure.code, error = %failure.message, "transport refused request");
                let envelope = ResultEnvelope::from_failure(&failure);
                self.insert(key.clone(), Slot::rejected(envelope.clone(), failure.code, hooks));
                self.fire_on_complete(&key);
                Ok(envelope)
            }
        }
    }

    /// Start the slot named by the write target.
    ///
    /// A slot of that name holding no live operation is erased first. On
    /// success the write target is cleared
    /// and the read target points at the new slot.
    ///
    /// # Errors
    ///
    /// `IllegalSlotName` if no write target is marked, `Conflict` if the
    /// target slot holds a live operation again, plus the errors of
    /// [`start`](Self::start).
    pub fn start_target(
        &mut self,
        request: RequestDescriptor,
        hooks: impl Into<HookBatch>,
    ) -> SlotResult<ResultEnvelope> {
        let key = self.write_target.clone().ok_or(SlotError::IllegalSlotName)?;
        if self.slots.get(&key).is_some_and(|slot| !slot.is_live()) {
            debug!(slot = %key, "replacing released slot");
            self.remove_slot(&key);
        }
        let ack = self.start(&key, request, hooks)?;
        self.write_target = None;
        self.read_target = Some(key);
        Ok(ack)
    }

    /// Append hooks to an existing slot's queue.
    ///
    /// # Errors
    ///
    /// `UnknownSlot` if the name is not registered, `MalformedHook` if the
    /// batch is rejected. A rejected batch leaves the queue untouched.
    pub fn push_hook(&mut self, name: &str, hooks: impl Into<HookBatch>) -> SlotResult<()> {
        let key = normalize(name);
        let slot = self
            .slots
            .get_mut(&key)
            .ok_or_else(|| SlotError::UnknownSlot(key.clone()))?;
        let hooks: HookBatch = hooks.into();
        let hooks = hooks.validate()?;
        trace!(slot = %key, count = hooks.len(), "hooks pushed");
        slot.hooks.extend(hooks);
        Ok(())
    }

    /// Release the slot's transport operation, aborting it if in flight.
    ///
    /// Status, envelope, result and hooks stay available until
    /// [`erase`](Self::erase).
    pub fn free(&mut self, name: &str) -> SlotResult<()> {
        let key = normalize(name);
        let slot = self
            .slots
            .get_mut(&key)
            .ok_or_else(|| SlotError::UnknownSlot(key.clone()))?;
        if let Some(id) = slot.handle.take() {
            self.operations.remove(&id);
            self.transport.close(id);
            debug!(slot = %key, op = %id, "slot freed");
        }
        Ok(())
    }

    /// Free the slot and drop all of its bookkeeping.
    pub fn erase(&mut self, name: &str, if_missing_ok: bool) -> SlotResult<()> {
        let key = normalize(name);
        if self.remove_slot(&key) || if_missing_ok {
            Ok(())
        } else {
            Err(SlotError::UnknownSlot(key))
        }
    }

    /// Erase slots in bulk and return their names.
    ///
    /// With `all` every slot goes. Otherwise only slots that are resolved
    /// and hold no live transport operation.
    pub fn erase_all(&mut self, all: bool) -> Vec<String> {
        let doomed: Vec<String> = self
            .order
            .iter()
            .filter(|name| all || self.slots.get(*name).is_some_and(Slot::is_erasable))
            .cloned()
            .collect();
        for name in &doomed {
            self.remove_slot(name);
        }
        doomed
    }

    /// Install a synthetic, already successful slot.
    ///
    /// Any existing slot of that name is erased first. The transport is not
    /// involved; `body` becomes the slot's result as is.
    pub fn emulate(
        &mut self,
        name: &str,
        body: impl Into<SlotValue>,
        overrides: EnvelopeOverrides,
    ) -> &mut Self {
        let key = normalize(name);
        self.remove_slot(&key);

        let body = body.into();
        let envelope = ResultEnvelope::emulated(body.to_bytes(), overrides);
        debug!(slot = %key, status = envelope.status(), "slot emulated");
        self.insert(key, Slot::emulated(envelope, body));
        self
    }

    /// Drop the transport's shared context.
    ///
    /// Every slot loses its transport operation, as if freed. Pending slots
    /// stay pending; later waits report no outstanding work.
    pub fn teardown(&mut self) {
        debug!(pending = self.operations.len(), "tearing down transport");
        self.transport.teardown();
        self.operations.clear();
        for slot in self.slots.values_mut() {
            slot.handle = None;
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Current status without polling the transport; `None` if unknown.
    pub fn check(&self, name: &str) -> Option<SlotStatus> {
        self.slots.get(&normalize(name)).map(|slot| slot.status)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(&normalize(name))
    }

    /// Live transport operation of the slot.
    pub fn handle(&self, name: &str) -> Option<OperationId> {
        self.slots.get(&normalize(name)).and_then(|slot| slot.handle)
    }

    /// Envelope of the slot once its request has finished.
    pub fn envelope(&self, name: &str) -> Option<&ResultEnvelope> {
        self.slots
            .get(&normalize(name))
            .and_then(|slot| slot.envelope.as_ref())
    }

    /// Mutable access to the slot's stored result.
    ///
    /// Seeds the result from the envelope body when nothing is stored yet;
    /// `None` while the slot has no envelope. On-complete hooks use this to
    /// annotate a result before any caller fetches it.
    pub fn result_mut(&mut self, name: &str) -> Option<&mut SlotValue> {
        let slot = self.slots.get_mut(&normalize(name))?;
        let envelope = slot.envelope.as_ref()?;
        Some(
            slot.result
                .get_or_insert_with(|| SlotValue::Raw(envelope.body().clone())),
        )
    }

    /// Number of registered slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Every registered slot with its status, in registration order.
    pub fn iterate_existing(&self) -> impl Iterator<Item = (String, SlotStatus)> + '_ {
        self.order.iter().filter_map(|name| {
            self.slots
                .get(name)
                .map(|slot| (name.clone(), slot.status))
        })
    }

    // =========================================================================
    // Targets
    // =========================================================================

    /// Make `name` the slot read by `fetch_results(None)`.
    pub fn mark_read_target(&mut self, name: &str) -> &mut Self {
        self.read_target = Some(normalize(name));
        self
    }

    /// Make `name` the slot started by [`start_target`](Self::start_target).
    ///
    /// A registered slot without a live operation may be marked; it is
    /// replaced when [`start_target`](Self::start_target) runs.
    ///
    /// # Errors
    ///
    /// `Conflict` if `name` is a slot that still holds a live operation.
    pub fn mark_write_target(&mut self, name: &str) -> SlotResult<&mut Self> {
        let key = normalize(name);
        if self.slots.get(&key).is_some_and(Slot::is_live) {
            return Err(SlotError::Conflict(key));
        }
        self.write_target = Some(key);
        Ok(self)
    }

    pub fn read_target(&self) -> Option<&str> {
        self.read_target.as_deref()
    }

    pub fn write_target(&self) -> Option<&str> {
        self.write_target.as_deref()
    }

    // =========================================================================
    // Waiting and results
    // =========================================================================

    /// Drive the transport until something is ready.
    ///
    /// With a name: `Resolved(status)` once that slot is resolved (at once if
    /// it already is), or `Idle` if the slot is unknown, freed, or no
    /// transport work remains that could resolve it. Without a name: `Changed(names)` for the slots resolved in
    /// the first productive polling cycle, or `Idle` when nothing is running.
    pub fn wait_ready(&mut self, name: Option<&str>) -> Wait {
        match name {
            Some(name) => self.wait_for(&normalize(name)),
            None => self.wait_any(),
        }
    }

    /// Wait for the slot, run its pending transforms, and return its value.
    ///
    /// Without a name the read target is used. Transforms and finishers run
    /// once, in push order; later calls return the stored value.
    ///
    /// # Errors
    ///
    /// - `IllegalSlotName` if no name is given and no read target is marked.
    /// - `UnknownSlot` if the name is not registered, or the wait went idle
    ///   while the slot was still pending.
    /// - `DamagedSlot` if the slot was freed (or torn down) while pending,
    ///   or is resolved without an envelope.
    /// - `HookFailed` if a transform or finisher fails; the hooks before it
    ///   stay applied and the ones after it stay queued.
    pub fn fetch_results(&mut self, name: Option<&str>) -> SlotResult<SlotValue> {
        let key = self.resolve_read_target(name)?;
        if !self.slots.contains_key(&key) {
            return Err(SlotError::UnknownSlot(key));
        }

        match self.wait_for(&key) {
            Wait::Resolved(_) => {}
            Wait::Changed(_) | Wait::Idle => {
                return Err(match self.slots.get(&key) {
                    Some(slot) if !slot.is_live() => {
                        SlotError::damaged(&key, "pending slot has no transport operation")
                    }
                    _ => SlotError::UnknownSlot(key),
                });
            }
        }

        // An on-complete hook may have erased the slot
        let slot = self
            .slots
            .get_mut(&key)
            .ok_or_else(|| SlotError::UnknownSlot(key.clone()))?;
        let Some(envelope) = slot.envelope.as_ref() else {
            return Err(SlotError::damaged(key, "resolved slot has no envelope"));
        };

        let mut value = match slot.result.take() {
            Some(value) => value,
            None => SlotValue::Raw(envelope.body().clone()),
        };

        while let Some(hook) = slot.hooks.pop_front() {
            let applied = match hook {
                Hook::OnComplete { .. } => {
                    trace!(slot = %key, "skipping on-complete hook queued after completion");
                    continue;
                }
                Hook::Incremental(mut finisher) => finisher.feed(value.clone()),
                Hook::Transform(transform) => transform(value.clone()),
            };
            match applied {
                Ok(next) => value = next,
                Err(err) => {
                    warn!(slot = %key, error = %err, "hook failed");
                    slot.result = Some(value);
                    return Err(SlotError::HookFailed {
                        name: key,
                        message: err.to_string(),
                    });
                }
            }
        }

        slot.result = Some(value.clone());
        Ok(value)
    }

    /// Lazily yield slots as they finish, in observed completion order.
    ///
    /// Slots that are already resolved come first, in the order their
    /// resolution was observed.
    /// With `apply_hooks` each item carries the
    /// [`fetch_results`](Self::fetch_results) value, otherwise the envelope.
    pub fn iterate_finished(&mut self, apply_hooks: bool) -> FinishedSlots<'_> {
        FinishedSlots::new(self, apply_hooks)
    }

    /// Resolved slots (observed resolution order) and pending slots that can
    /// still resolve.
    pub(crate) fn iteration_state(&self) -> (VecDeque<String>, HashSet<String>) {
        let mut resolved = Vec::new();
        let mut pending = HashSet::new();
        for name in &self.order {
            match self.slots.get(name) {
                Some(slot) if slot.status.is_resolved() => {
                    resolved.push((slot.completed_at, name.clone()));
                }
                Some(slot) if slot.is_live() => {
                    pending.insert(name.clone());
                }
                _ => {}
            }
        }
        resolved.sort_by_key(|(completed_at, _)| *completed_at);
        (resolved.into_iter().map(|(_, name)| name).collect(), pending)
    }

    // =========================================================================
    // Polling internals
    // =========================================================================

    fn wait_for(&mut self, key: &str) -> Wait {
        loop {
            match self.slots.get(key) {
                Some(slot) if slot.status.is_resolved() => return Wait::Resolved(slot.status),
                Some(slot) if slot.is_live() => {}
                // Unknown, or pending without an operation: nothing can resolve it
                _ => return Wait::Idle,
            }
            if !self.poll_cycle().is_empty() {
                continue;
            }
            if self.transport.running() == 0 {
                return Wait::Idle;
            }
            self.block();
        }
    }

    fn wait_any(&mut self) -> Wait {
        loop {
            let changed = self.poll_cycle();
            if !changed.is_empty() {
                return Wait::Changed(changed);
            }
            if self.transport.running() == 0 {
                return Wait::Idle;
            }
            self.block();
        }
    }

    /// Drain completions until none are left, nothing is running, or the
    /// drain budget is spent. Returns the slots resolved in this cycle.
    fn poll_cycle(&mut self) -> Vec<String> {
        let started = Instant::now();
        let budget = self.settings.drain_budget();
        let mut changed = Vec::new();

        loop {
            let batch = self.transport.drain();
            if batch.is_empty() {
                break;
            }
            for completion in batch {
                if let Some(name) = self.complete(completion) {
                    changed.push(name);
                }
            }
            if self.transport.running() == 0 || started.elapsed() >= budget {
                break;
            }
        }
        changed
    }

    fn block(&mut self) {
        match self.transport.wait(self.settings.select_timeout()) {
            Readiness::Ready | Readiness::TimedOut => {}
            Readiness::Unsupported => thread::sleep(self.settings.idle_sleep()),
        }
    }

    fn complete(&mut self, completion: Completion) -> Option<String> {
        let Some(key) = self.operations.remove(&completion.id) else {
            trace!(op = %completion.id, "dropping completion of released operation");
            return None;
        };

        let status = match &completion.outcome {
            Ok(()) => SlotStatus::Success,
            Err(failure) => SlotStatus::TransportError(failure.code),
        };
        let envelope = ResultEnvelope::from_completion(completion);

        let slot = self.slots.get_mut(&key)?;
        if !slot.resolve(status, envelope) {
            return None;
        }
        self.resolutions += 1;
        slot.completed_at = Some(self.resolutions);
        debug!(slot = %key, status = ?status, "slot resolved");

        self.fire_on_complete(&key);
        Some(key)
    }

    fn fire_on_complete(&mut self, key: &str) {
        let hooks = match self.slots.get_mut(key) {
            Some(slot) => slot.take_on_complete(),
            None => return,
        };
        for (callback, param) in hooks {
            trace!(slot = key, "firing on-complete hook");
            callback(self, key, param.as_ref());
        }
    }

    fn resolve_read_target(&self, name: Option<&str>) -> SlotResult<String> {
        match name {
            Some(name) => Ok(normalize(name)),
            None => self.read_target.clone().ok_or(SlotError::IllegalSlotName),
        }
    }

    fn insert(&mut self, key: String, mut slot: Slot) {
        if slot.status.is_resolved() {
            self.resolutions += 1;
            slot.completed_at = Some(self.resolutions);
        }
        self.order.push(key.clone());
        self.slots.insert(key, slot);
    }

    fn remove_slot(&mut self, key: &str) -> bool {
        if self.free(key).is_err() {
            return false;
        }
        self.slots.remove(key);
        self.order.retain(|name| name != key);
        debug!(slot = key, "slot erased");
        true
    }
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("slots", &self.order)
            .field("running", &self.transport.running())
            .field("read_target", &self.read_target)
            .field("write_target", &self.write_target)
            .finish()
    }
}
