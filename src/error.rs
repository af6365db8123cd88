// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Error taxonomy.
//!
//! Mirrors the failure kinds in the runtime design: type mismatches,
//! arity/shape problems, fiber-state violations and user throws all become
//! `Error` and are recoverable through `try_catch_ensure`. Lookup failures
//! with no `method_missing` and resource exhaustion are deliberately *not*
//! represented here — the design calls those fatal, so they abort the
//! process instead of unwinding (see `dispatch::method_missing_abort` and
//! `alloc::Block::new`).

use crate::value::Value;
use thiserror::Error;

/// A recoverable runtime error.
#[derive(Debug, Error)]
pub enum Error {
    /// Wrong receiver class for an operation that required a specific one.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Description of the type that was required.
        expected: &'static str,
        /// The type name actually found.
        got: &'static str,
    },

    /// Wrong argument count, or a positional argument collided with a
    /// named one for the same parameter.
    #[error("arity error: {0}")]
    Arity(String),

    /// A duplicate method or property definition on the same class.
    #[error("method `{0}` already defined on this class")]
    DuplicateMethod(String),

    /// Attempted to resume a fiber that is not in a resumable state.
    #[error("cannot resume a fiber that is {0}")]
    FiberState(&'static str),

    /// A value was passed to `throw`; carries the raised value and the
    /// frame chain captured at the throw site for backtrace reconstruction.
    #[error("unhandled exception")]
    Thrown(Value),

    /// Malformed or truncated marshal stream.
    #[error("marshal error: {0}")]
    Marshal(String),

    /// A module's entry point could not be located or invoked.
    #[error("module load error: {0}")]
    ModuleLoad(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
