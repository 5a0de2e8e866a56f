//! Error type definitions for the doc-gate application
//!
//! The hierarchy mirrors the layers of the system: compile-time rule errors,
//! expression sandbox failures, accessor faults, and the user-visible
//! permission denial raised by the gateway facade.

use thiserror::Error;

use crate::models::ValidateError;

/// Top-level application error type
///
/// Everything that can go wrong between accepting a data request and
/// returning a response converts into this enum. Note that validator
/// non-matches never appear here; they are collected into
/// [`GateError::PermissionDenied`] only once every rule variant has been
/// exhausted.
#[derive(Error, Debug)]
pub enum GateError {
    /// Rule set compilation or registry errors
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Expression sandbox errors
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Accessor faults during exists/unique lookups or CRUD dispatch
    #[error("Accessor error: {0}")]
    Accessor(#[from] AccessorError),

    /// Request rejected by the rule engine; carries the per-variant errors
    #[error("Permission denied ({} error(s))", errors.len())]
    PermissionDenied { errors: Vec<ValidateError> },

    /// Request cancelled at a suspension point
    #[error("Cancelled")]
    Cancelled,

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised while compiling a rule source or mutating the registry
///
/// These are fatal to the caller of `load`/`add`/`set`/`register`; no
/// partial state is retained when one is returned.
#[derive(Error, Debug)]
pub enum CompileError {
    /// A rule variant references a validator name that was never registered
    #[error("unknown validator \"{name}\" in rules for {collection} {action}")]
    UnknownValidator {
        name: String,
        collection: String,
        action: String,
    },

    /// A field rule carries a key outside the recognized rule vocabulary
    #[error("unknown rule \"{key}\" for field \"{field}\"")]
    UnknownRule { field: String, key: String },

    /// Registering a validator under a name that is already taken
    #[error("validator \"{name}\" is already registered")]
    DuplicateValidator { name: String },

    /// Registering a validator under an empty name
    #[error("validator name must not be empty")]
    InvalidValidatorName,

    /// `add` on a collection that already has compiled rules
    #[error("collection \"{name}\" already exists")]
    CollectionExists { name: String },

    /// A permission config or validator config has an unusable shape
    #[error("bad rule shape for {context}: {message}")]
    BadShape { context: String, message: String },

    /// Reading or parsing a rule file failed
    #[error("rule file {path}: {message}")]
    RuleFile { path: String, message: String },
}

impl CompileError {
    /// Create a bad-shape error
    pub fn bad_shape<C: Into<String>, M: Into<String>>(context: C, message: M) -> Self {
        Self::BadShape {
            context: context.into(),
            message: message.into(),
        }
    }
}

/// Failure inside the expression sandbox
///
/// Carries the offending source text and the underlying parse or eval
/// message. The `condition` validator surfaces these as non-matches so a
/// broken expression in one variant cannot poison the engine.
#[derive(Error, Debug, Clone)]
#[error("expression \"{expression}\" failed: {message}")]
pub struct ExpressionError {
    pub expression: String,
    pub message: String,
}

impl ExpressionError {
    pub fn new<E: Into<String>, M: Into<String>>(expression: E, message: M) -> Self {
        Self {
            expression: expression.into(),
            message: message.into(),
        }
    }
}

/// Accessor layer faults
///
/// Raised by `exists`/`unique` lookups and by the CRUD surface. These are
/// propagated to the caller of `validate` as faults, never folded into the
/// non-match flow.
#[derive(Error, Debug)]
pub enum AccessorError {
    /// A query could not be evaluated against the store
    #[error("query failed on \"{collection}\": {message}")]
    QueryFailed { collection: String, message: String },

    /// The request asked for an operation the accessor does not support
    #[error("unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Malformed payload handed to the CRUD surface
    #[error("invalid payload for {operation}: {message}")]
    InvalidPayload { operation: String, message: String },
}

impl AccessorError {
    /// Create a query-failed error
    pub fn query_failed<C: Into<String>, M: Into<String>>(collection: C, message: M) -> Self {
        Self::QueryFailed {
            collection: collection.into(),
            message: message.into(),
        }
    }
}
