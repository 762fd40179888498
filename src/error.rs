//! Error taxonomy.
//!
//! Construction-time and composition-time errors abort component creation
//! synchronously. Runtime handler errors are caught at the event-binding
//! boundary (see `events::dispatch`) and logged, never propagated into the
//! render loop.

use crate::types::Value;

/// Errors raised by the component engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A `required` slot received no value at construction.
    #[error("attribute `{0}` is required but no value was provided")]
    MissingAttribute(String),

    /// A `const` slot already holding a non-null value was written again.
    #[error("attribute `{0}` is const and already holds a value")]
    ConstAttributeReassigned(String),

    /// A value outside the slot's declared enum.
    #[error("invalid value for attribute `{name}`: {value:?} (allowed: {allowed:?})")]
    InvalidValue {
        name: String,
        value: Value,
        allowed: Vec<Value>,
    },

    /// An unrecognized `.modifier` token in an event spec.
    #[error("unknown event modifier `.{0}`")]
    UnknownEventModifier(String),

    /// The same handler registered twice for one slot event.
    #[error("handler `{handler}` is already registered for `{event}`")]
    DuplicateHandler { event: String, handler: String },

    /// Mount/unmount against an inconsistent host-tree parent, a missing
    /// mount point, or a lifecycle transition the engine does not support.
    #[error("host tree state error: {0}")]
    HostTreeState(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
