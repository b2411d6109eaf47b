//! Post-processing hooks attached to a slot.
//!
//! Three kinds, fired at two different moments:
//!
//! | kind                     | mode | fires                                   |
//! |--------------------------|------|-----------------------------------------|
//! | [`Hook::OnComplete`]     | 0    | when the multiplexer sees the request finish |
//! | [`Hook::Incremental`]    | 1    | on the first `fetch_results` for the slot |
//! | [`Hook::Transform`]      | 2    | on the first `fetch_results` for the slot |
//!
//! Modes 1 and 2 compose in push order: `[f, g]` on raw value `r` yields
//! `g(f(r))`.

use std::fmt;

use serde_json::Value;
use tracing::debug;

use super::error::{HookError, SlotError, SlotResult};
use super::multiplexer::Multiplexer;
use super::value::SlotValue;

/// Side effect run when a slot's request finishes.
pub type OnCompleteFn = Box<dyn FnOnce(&mut Multiplexer, &str, Option<&Value>)>;

/// Plain value-to-value transform.
pub type TransformFn = Box<dyn FnOnce(SlotValue) -> Result<SlotValue, HookError>>;

type StartFn = Box<dyn FnOnce(SlotValue) -> Step>;
type ResumeFn = Box<dyn FnOnce() -> Step>;

/// One step of an incremental finisher.
pub enum Step {
    /// The finisher produced its value.
    Done(SlotValue),
    /// The finisher gave up.
    Failed(HookError),
    /// The finisher suspended; resume it with the stored continuation.
    Suspend(ResumeFn),
}

impl Step {
    pub fn suspend(next: impl FnOnce() -> Step + 'static) -> Self {
        Self::Suspend(Box::new(next))
    }
}

enum FinisherState {
    NotStarted(StartFn),
    Fed,
}

/// A resumable finisher: fed one value, it runs until it produces a result.
///
/// An `Incremental` can be fed exactly once.
pub struct Incremental {
    state: FinisherState,
}

impl Incremental {
    pub fn new(start: impl FnOnce(SlotValue) -> Step + 'static) -> Self {
        Self {
            state: FinisherState::NotStarted(Box::new(start)),
        }
    }

    /// Check if the finisher has already been fed.
    pub fn is_started(&self) -> bool {
        matches!(self.state, FinisherState::Fed)
    }

    /// Feed `input` and resume until the finisher produces its value.
    pub fn feed(&mut self, input: SlotValue) -> Result<SlotValue, HookError> {
        let FinisherState::NotStarted(start) =
            std::mem::replace(&mut self.state, FinisherState::Fed)
        else {
            return Err(HookError::new("finisher was already fed"));
        };

        let mut step = start(input);
        let mut resumptions = 0usize;
        loop {
            match step {
                Step::Done(value) => {
                    debug!(resumptions, "finisher produced value");
                    return Ok(value);
                }
                Step::Failed(err) => return Err(err),
                Step::Suspend(next) => {
                    resumptions += 1;
                    step = next();
                }
            }
        }
    }
}

/// Post-processing attached to a slot.
pub enum Hook {
    /// Mode 0: side effect fired once when the request finishes.
    OnComplete {
        callback: OnCompleteFn,
        param: Option<Value>,
    },
    /// Mode 1: resumable finisher consumed by `fetch_results`.
    Incremental(Incremental),
    /// Mode 2: transform consumed by `fetch_results`.
    Transform(TransformFn),
}

impl Hook {
    pub fn on_complete(
        callback: impl FnOnce(&mut Multiplexer, &str, Option<&Value>) + 'static,
    ) -> Self {
        Self::OnComplete {
            callback: Box::new(callback),
            param: None,
        }
    }

    /// Mode-0 hook receiving `param` when it fires.
    pub fn on_complete_with(
        callback: impl FnOnce(&mut Multiplexer, &str, Option<&Value>) + 'static,
        param: Value,
    ) -> Self {
        Self::OnComplete {
            callback: Box::new(callback),
            param: Some(param),
        }
    }

    pub fn incremental(start: impl FnOnce(SlotValue) -> Step + 'static) -> Self {
        Self::Incremental(Incremental::new(start))
    }

    pub fn transform(
        transform: impl FnOnce(SlotValue) -> Result<SlotValue, HookError> + 'static,
    ) -> Self {
        Self::Transform(Box::new(transform))
    }

    /// Numeric mode of this hook (0, 1 or 2).
    pub fn mode(&self) -> u8 {
        match self {
            Self::OnComplete { .. } => 0,
            Self::Incremental(_) => 1,
            Self::Transform(_) => 2,
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnComplete { param, .. } => f
                .debug_struct("OnComplete")
                .field("param", param)
                .finish_non_exhaustive(),
            Self::Incremental(finisher) => f
                .debug_struct("Incremental")
                .field("started", &finisher.is_started())
                .finish(),
            Self::Transform(_) => f.write_str("Transform"),
        }
    }
}

/// One or more hooks pushed together.
///
/// A batch is validated as a whole: if any hook is rejected, none is
/// registered.
#[derive(Debug, Default)]
pub struct HookBatch(Vec<Hook>);

impl HookBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, hook: Hook) -> Self {
        self.0.push(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn validate(self) -> SlotResult<Vec<Hook>> {
        for (index, hook) in self.0.iter().enumerate() {
            match hook {
                Hook::Incremental(finisher) if finisher.is_started() => {
                    return Err(SlotError::malformed(format!(
                        "hook #{} is a finisher that was already fed",
                        index
                    )));
                }
                Hook::OnComplete { .. } | Hook::Incremental(_) | Hook::Transform(_) => {}
            }
        }
        Ok(self.0)
    }
}

impl From<Hook> for HookBatch {
    fn from(hook: Hook) -> Self {
        Self(vec![hook])
    }
}

impl From<Vec<Hook>> for HookBatch {
    fn from(hooks: Vec<Hook>) -> Self {
        Self(hooks)
    }
}

impl From<Option<Hook>> for HookBatch {
    fn from(hook: Option<Hook>) -> Self {
        Self(hook.into_iter().collect())
    }
}

// ============================================================================
// Stock hooks
// ============================================================================

/// Mode 2: parse the raw payload as JSON.
pub fn json() -> Hook {
    Hook::transform(|value| Ok(SlotValue::Json(value.into_json()?)))
}

/// Mode 1: wait for the value, then project `key` out of a JSON object.
pub fn field(key: impl Into<String>) -> Hook {
    let key = key.into();
    Hook::incremental(move |value| {
        Step::suspend(move || project(value, &key))
    })
}

pub(crate) fn project(value: SlotValue, key: &str) -> Step {
    match value.into_json() {
        Ok(Value::Object(mut object)) => match object.remove(key) {
            Some(field) => Step::Done(SlotValue::Json(field)),
            None => Step::Failed(HookError::new(format!("field '{}' not present", key))),
        },
        Ok(other) => Step::Failed(HookError::new(format!(
            "cannot project '{}' out of non-object value {}",
            key, other
        ))),
        Err(err) => Step::Failed(err.into()),
    }
}

/// Mode 0: log the slot's status and total transfer time.
pub fn log_completion() -> Hook {
    Hook::on_complete(|mux, name, _| report_completion(mux, name))
}

pub(crate) fn report_completion(mux: &Multiplexer, name: &str) {
    if let Some(envelope) = mux.envelope(name) {
        debug!(
            slot = name,
            status = envelope.status(),
            total_time = ?envelope.metadata().get("total_time"),
            error = envelope.transport_error(),
            "slot completed"
        );
    }
}
