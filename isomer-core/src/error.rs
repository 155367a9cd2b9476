use std::fmt;

use crate::hooks::HookKind;

/// Error raised by a user-supplied substitution or restoring hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the codec.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Error type for encode and decode passes.
///
/// Every variant is terminal for the pass that raised it: the codec never
/// retries and never returns a partially decoded graph.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("{hook} hook of `{type_name}` failed: {source}")]
    HookInvocation {
        type_name: String,
        hook: HookKind,
        #[source]
        source: HookError,
    },
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("unknown concrete type id {0}")]
    UnknownConcreteType(u32),
    #[error("failed to build codec for `{type_name}`: {reason}")]
    CacheBuild { type_name: String, reason: String },
    #[error("type `{0}` is not registered")]
    Unregistered(String),
    #[error("type `{0}` is already registered")]
    DuplicateType(String),
    #[error("type id {id} is already taken by `{existing}`")]
    DuplicateId { id: u32, existing: String },
    #[error("expected a `{expected}` value, found `{found}`")]
    TypeMismatch { expected: String, found: String },
    #[error("schema of `{type_name}` differs from peer (local {local:#010x}, remote {remote:#010x})")]
    SchemaMismatch {
        type_name: String,
        local: u32,
        remote: u32,
    },
    #[error("stream was written in {remote} mode, session is {local}")]
    SchemaModeMismatch {
        local: crate::SchemaMode,
        remote: crate::SchemaMode,
    },
    #[error("reference {0} points to a value that is not materialized yet")]
    DanglingReference(u32),
    #[error("nesting depth exceeds limit of {0}")]
    DepthExceeded(usize),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid utf-8 in string payload: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

impl CodecError {
    pub(crate) fn protocol(msg: impl fmt::Display) -> Self {
        CodecError::ProtocolViolation(msg.to_string())
    }

    pub(crate) fn mismatch(expected: impl fmt::Display, found: impl fmt::Display) -> Self {
        CodecError::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
