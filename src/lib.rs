//! native-bridge - Safe Foreign Function Calls
//!
//! Calls functions in native, C-ABI libraries from Rust without generated
//! bindings. Each function is declared once with an explicit signature;
//! every call is checked against it before any unsafe code runs.
//!
//! # Features
//!
//! - **Explicit declarations**: `declare` or `declare_c("int printf(const char*, ...)")`
//!   produce an immutable [`FunctionSignature`](ffi::FunctionSignature)
//! - **Checked marshaling**: arity, kinds and integer ranges are validated;
//!   text becomes a null-terminated buffer owned by the call frame
//! - **Variadic calls**: extra arguments are passed by their own type with
//!   C default promotions, through libffi
//! - **Isolated calls**: on unix, run a call in a forked child and get the
//!   exit code or signal back when native code crashes
//! - **Config-driven setup**: `bridge.toml` lists libraries and declarations
//!
//! # Example
//!
//! ```no_run
//! use native_bridge::ffi::{call, declare, load, FfiType};
//!
//! let process = load(None)?;
//! let strlen = declare(&process, "strlen", FfiType::USize, &[FfiType::CStr], false)?;
//! let len = call(&strlen, &["Hello from C!".into()])?;
//! assert_eq!(len.as_u64(), Some(13));
//! # Ok::<(), native_bridge::ffi::FfiError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Bridge        │  Named libraries, qualified function table
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   Signature     │  Prototype bound to a resolved symbol
//! └────────┬────────┘
//!          │
//!     ┌────┴────────┐
//!     ▼             ▼
//! ┌────────┐  ┌──────────┐
//! │ call   │  │ isolated │  fork + waitpid
//! └───┬────┘  └────┬─────┘
//!     └──────┬─────┘
//!            ▼
//! ┌─────────────────────┐
//! │   Native Code       │  libffi, platform C ABI
//! └─────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod ffi;

pub use config::{BridgeConfig, ConfigError, Isolation, LibraryConfig};
pub use ffi::{
    call, call_isolated, declare, declare_c, load, Bridge, FfiError, FfiResult, FfiType,
    FfiValue, FunctionSignature, LibraryHandle, LibraryLoader, Prototype,
};
