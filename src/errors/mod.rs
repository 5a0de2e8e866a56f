//! Centralized error handling for the doc-gate application
//!
//! This module provides the error types used across all layers: rule
//! compilation, expression evaluation, accessor calls and the gateway
//! facade. A *non-match* from a validator is deliberately not represented
//! here — it is ordinary control flow inside the matcher and travels as a
//! plain message string.

pub mod types;

pub use types::*;

/// Convenience type alias for Results using GateError
pub type GateResult<T> = Result<T, GateError>;

/// Convenience type alias for compile Results
pub type CompileResult<T> = Result<T, CompileError>;

/// Convenience type alias for accessor Results
pub type AccessorResult<T> = Result<T, AccessorError>;
