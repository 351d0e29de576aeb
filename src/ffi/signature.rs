//! Declared Function Signatures
//!
//! Binds a prototype to a resolved symbol so every call goes through an
//! explicit, immutable declaration.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::error::FfiResult;
use super::library::LibraryHandle;
use super::types::{FfiType, Prototype};

/// A prototype bound to a symbol in a loaded library.
///
/// Immutable after creation. Holds its library alive, so the resolved
/// address stays valid for as long as the signature exists.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    prototype: Prototype,
    address: usize,
    library: Arc<LibraryHandle>,
}

impl FunctionSignature {
    pub fn name(&self) -> &str {
        &self.prototype.name
    }

    pub fn prototype(&self) -> &Prototype {
        &self.prototype
    }

    pub fn return_type(&self) -> FfiType {
        self.prototype.return_type
    }

    /// Fixed parameter types
    pub fn params(&self) -> &[FfiType] {
        &self.prototype.params
    }

    pub fn is_variadic(&self) -> bool {
        self.prototype.variadic
    }

    pub fn library(&self) -> &Arc<LibraryHandle> {
        &self.library
    }

    /// Resolved code address
    pub fn address(&self) -> usize {
        self.address
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.prototype.fmt(f)
    }
}

/// Declare the call shape of `name` exported by `handle`
pub fn declare(
    handle: &Arc<LibraryHandle>,
    name: &str,
    return_type: FfiType,
    param_types: &[FfiType],
    variadic: bool,
) -> FfiResult<FunctionSignature> {
    let prototype = Prototype {
        name: name.to_string(),
        params: param_types.to_vec(),
        return_type,
        variadic,
    };
    declare_prototype(handle, prototype)
}

/// Declare a function from an already-built prototype
#[instrument(
    name = "ffi::declare",
    level = "debug",
    skip_all,
    fields(function = %prototype.name, library = %handle.source())
)]
pub fn declare_prototype(
    handle: &Arc<LibraryHandle>,
    prototype: Prototype,
) -> FfiResult<FunctionSignature> {
    prototype.validate()?;
    let address = handle.symbol(&prototype.name)?;

    debug!(signature = %prototype, "declared function");
    Ok(FunctionSignature {
        prototype,
        address,
        library: Arc::clone(handle),
    })
}

/// Declare a function from a C declaration such as
/// `int printf(const char* format, ...);`
pub fn declare_c(handle: &Arc<LibraryHandle>, declaration: &str) -> FfiResult<FunctionSignature> {
    declare_prototype(handle, Prototype::parse(declaration)?)
}
