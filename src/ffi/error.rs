//! FFI Errors
//!
//! Every failure the bridge can report, carrying the library, symbol and
//! declared-vs-supplied type information needed to diagnose it.

use std::fmt;

use thiserror::Error;

use super::types::FfiType;
use crate::config::ConfigError;

/// Result type for bridge operations.
pub type FfiResult<T> = Result<T, FfiError>;

/// Error type for FFI operations
#[derive(Debug, Error)]
pub enum FfiError {
    /// The path did not resolve to a loadable image
    #[error("library '{library}' could not be loaded: {reason}")]
    LibraryNotFound { library: String, reason: String },

    /// The symbol is not exported by the library
    #[error("symbol '{symbol}' not found in '{library}': {reason}")]
    SymbolNotFound {
        symbol: String,
        library: String,
        reason: String,
    },

    /// A supplied argument cannot be marshaled to its declared type
    #[error("argument mismatch calling '{function}': {kind}")]
    ArgumentTypeMismatch { function: String, kind: MismatchKind },

    /// The native call could not be observed to complete
    #[error("native call to '{function}' did not complete: {status}")]
    NativeCallError { function: String, status: CallStatus },

    /// A C declaration or prototype is malformed
    #[error("invalid declaration: {0}")]
    InvalidDeclaration(String),

    /// No function has been declared under this qualified name
    #[error("function not declared: {0}")]
    FunctionNotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FfiError {
    pub(crate) fn mismatch(function: &str, kind: MismatchKind) -> Self {
        FfiError::ArgumentTypeMismatch {
            function: function.to_string(),
            kind,
        }
    }
}

/// Why an argument list was rejected before crossing into native code
#[derive(Debug, Clone, PartialEq)]
pub enum MismatchKind {
    /// Wrong number of arguments
    Arity {
        expected: usize,
        got: usize,
        variadic: bool,
    },
    /// The value's kind cannot be marshaled to the declared type
    Type {
        index: usize,
        expected: FfiType,
        got: FfiType,
    },
    /// The kinds are compatible but this particular value is not
    Value {
        index: usize,
        expected: FfiType,
        reason: String,
    },
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchKind::Arity {
                expected,
                got,
                variadic: true,
            } => write!(f, "expected at least {} arguments, got {}", expected, got),
            MismatchKind::Arity { expected, got, .. } => {
                write!(f, "expected {} arguments, got {}", expected, got)
            }
            MismatchKind::Type {
                index,
                expected,
                got,
            } => write!(
                f,
                "argument {}: declared {}, supplied {}",
                index, expected, got
            ),
            MismatchKind::Value {
                index,
                expected,
                reason,
            } => write!(f, "argument {}: cannot pass as {}: {}", index, expected, reason),
        }
    }
}

/// What is known about a native call that did not return normally
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    /// The process running the call exited with this code before returning
    Exited(i32),
    /// The process running the call was terminated by a signal
    Signaled { signal: String, core_dumped: bool },
    /// Completion could not be observed at all
    Unobservable(String),
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Exited(code) => write!(f, "exited with code {}", code),
            CallStatus::Signaled {
                signal,
                core_dumped,
            } => {
                write!(f, "terminated by {}", signal)?;
                if *core_dumped {
                    write!(f, " (core dumped)")?;
                }
                Ok(())
            }
            CallStatus::Unobservable(reason) => write!(f, "{}", reason),
        }
    }
}
