//! Foreign Function Bridge
//!
//! Calls C-ABI functions in native libraries through explicit, checked
//! declarations.
//!
//! # Architecture
//!
//! ```text
//! load(path | none)
//!       │
//!       ▼
//! LibraryHandle (libloading)
//!       │
//!       ▼
//! declare / declare_c ──► FunctionSignature (immutable, shareable)
//!       │
//!       ▼
//! call ──► MarshaledArgs ──► libffi CIF ──► native function
//!       │
//!       ▼
//! FfiValue
//! ```
//!
//! # Example
//!
//! ```no_run
//! use native_bridge::ffi::{call, declare_c, load};
//!
//! let libc = load(None)?;
//! let printf = declare_c(&libc, "int printf(const char* format, ...);")?;
//! let written = call(&printf, &["%s\n".into(), "Hello from C!".into()])?;
//! assert_eq!(written.as_i64(), Some(14));
//! # Ok::<(), native_bridge::ffi::FfiError>(())
//! ```

mod bridge;
mod call;
mod error;
mod isolate;
mod library;
mod marshal;
mod signature;
mod types;

pub use bridge::Bridge;
pub use call::call;
pub use error::{CallStatus, FfiError, FfiResult, MismatchKind};
pub use isolate::call_isolated;
pub use library::{load, LibraryHandle, LibraryLoader, LibrarySource};
pub use marshal::{ArgList, MarshaledArgs};
pub use signature::{declare, declare_c, declare_prototype, FunctionSignature};
pub use types::{FfiType, FfiValue, Prototype};
