//! Slot-specific error types.

use thiserror::Error;

use super::envelope::STATUS_CONFLICT;

/// Result type for slot operations.
pub type SlotResult<T> = Result<T, SlotError>;

/// Errors reported synchronously by multiplexer operations.
///
/// Transport failures are not part of this type: they are recorded in the
/// slot status and its [`ResultEnvelope`](super::ResultEnvelope).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    /// A slot with this name is already registered.
    #[error("slot '{0}' already exists")]
    Conflict(String),

    /// No bookkeeping exists for this name.
    #[error("unknown slot '{0}'")]
    UnknownSlot(String),

    /// No name was given and no target slot is marked.
    #[error("no slot name given and no target slot marked")]
    IllegalSlotName,

    /// Stored bookkeeping is structurally incomplete.
    #[error("slot '{name}' is damaged: {reason}")]
    DamagedSlot {
        /// Slot name.
        name: String,
        /// What is missing.
        reason: String,
    },

    /// A hook batch does not have the required shape.
    #[error("malformed hook: {0}; expected {{mode, fn[, par]}} or a list of them")]
    MalformedHook(String),

    /// A finisher failed while producing its value.
    #[error("hook failed on slot '{name}': {message}")]
    HookFailed {
        /// Slot name.
        name: String,
        /// Failure reported by the hook.
        message: String,
    },
}

impl SlotError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedHook(reason.into())
    }

    pub fn damaged(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DamagedSlot {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is a name collision.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Check if this error means the name has no bookkeeping.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::UnknownSlot(_))
    }

    /// Protocol-style status for callers that report errors as codes.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Conflict(_) => STATUS_CONFLICT,
            Self::UnknownSlot(_) => 404,
            Self::IllegalSlotName | Self::MalformedHook(_) => 400,
            Self::DamagedSlot { .. } | Self::HookFailed { .. } => 500,
        }
    }
}

/// Failure raised by a hook while transforming a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<serde_json::Error> for HookError {
    fn from(err: serde_json::Error) -> Self {
        Self(format!("invalid JSON payload: {}", err))
    }
}
