//! Native Calls
//!
//! Performs a call through libffi under the platform's default C ABI and
//! converts the raw return value back into an [`FfiValue`].

use std::ffi::{c_char, c_void, CStr};

use libffi::middle::{Arg, Cif, CodePtr};
use tracing::{instrument, trace};

use super::error::FfiResult;
use super::marshal::{ffi_type, MarshaledArgs};
use super::signature::FunctionSignature;
use super::types::{FfiType, FfiValue, Prototype};

/// Return value of a native call before conversion
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum RawReturn {
    Void,
    /// Integer or pointer, widened to a full register
    Word(u64),
    F32(f32),
    F64(f64),
}

impl RawReturn {
    /// Pack into one 64-bit word
    pub(crate) fn to_word(self) -> u64 {
        match self {
            RawReturn::Void => 0,
            RawReturn::Word(w) => w,
            RawReturn::F32(v) => v.to_bits() as u64,
            RawReturn::F64(v) => v.to_bits(),
        }
    }

    /// Unpack a word produced by [`RawReturn::to_word`]
    pub(crate) fn from_word(word: u64, return_type: FfiType) -> Self {
        match return_type {
            FfiType::Void => RawReturn::Void,
            FfiType::F32 => RawReturn::F32(f32::from_bits(word as u32)),
            FfiType::F64 => RawReturn::F64(f64::from_bits(word)),
            _ => RawReturn::Word(word),
        }
    }

    /// Convert to a value of the declared return type.
    ///
    /// `read_text` is given the address of a non-null returned C string.
    pub(crate) fn decode(
        self,
        return_type: FfiType,
        read_text: impl FnOnce(usize) -> String,
    ) -> FfiValue {
        let word = match self {
            RawReturn::Void => return FfiValue::Void,
            RawReturn::F32(v) => return FfiValue::F32(v),
            RawReturn::F64(v) => return FfiValue::F64(v),
            RawReturn::Word(w) => w,
        };

        match return_type {
            FfiType::Void => FfiValue::Void,
            FfiType::I8 => FfiValue::I8(word as i8),
            FfiType::I16 => FfiValue::I16(word as i16),
            FfiType::I32 => FfiValue::I32(word as i32),
            FfiType::I64 => FfiValue::I64(word as i64),
            FfiType::U8 => FfiValue::U8(word as u8),
            FfiType::U16 => FfiValue::U16(word as u16),
            FfiType::U32 => FfiValue::U32(word as u32),
            FfiType::U64 => FfiValue::U64(word),
            FfiType::ISize => FfiValue::ISize(word as isize),
            FfiType::USize => FfiValue::USize(word as usize),
            FfiType::F32 => FfiValue::F32(f32::from_bits(word as u32)),
            FfiType::F64 => FfiValue::F64(f64::from_bits(word)),
            FfiType::Ptr => FfiValue::Ptr(word as usize),
            FfiType::CStr if word == 0 => FfiValue::Ptr(0),
            FfiType::CStr => FfiValue::Text(read_text(word as usize)),
        }
    }
}

/// Prepare the call interface for one frame
pub(crate) fn build_cif(prototype: &Prototype, frame: &MarshaledArgs) -> Cif {
    let arg_types = frame.arg_types().iter().map(|ty| ffi_type(*ty));
    let result = ffi_type(prototype.return_type);

    if prototype.variadic {
        Cif::new_variadic(arg_types, frame.fixed_count(), result)
    } else {
        Cif::new(arg_types, result)
    }
}

/// Call `address` through `cif`.
///
/// # Safety
///
/// `address` must be a function whose real signature matches `cif`, and
/// every pointer in `args` must be valid for the duration of the call.
pub(crate) unsafe fn invoke_raw(
    cif: &Cif,
    address: usize,
    return_type: FfiType,
    args: &[Arg],
) -> RawReturn {
    let code = CodePtr::from_ptr(address as *const c_void);

    // Integer results narrower than a register are written as a full ffi_arg
    match return_type {
        FfiType::Void => {
            cif.call::<()>(code, args);
            RawReturn::Void
        }
        FfiType::F32 => RawReturn::F32(cif.call::<f32>(code, args)),
        FfiType::F64 => RawReturn::F64(cif.call::<f64>(code, args)),
        _ => RawReturn::Word(cif.call::<u64>(code, args)),
    }
}

/// Call a declared function in this process.
///
/// Blocks until the native function returns. A fault inside native code is
/// not recoverable here; use [`call_isolated`](super::call_isolated) when the
/// caller needs to observe one.
#[instrument(
    name = "ffi::call",
    level = "trace",
    skip_all,
    fields(function = %signature.name(), args = args.len())
)]
pub fn call(signature: &FunctionSignature, args: &[FfiValue]) -> FfiResult<FfiValue> {
    let prototype = signature.prototype();
    let frame = MarshaledArgs::new(prototype, args)?;
    let cif = build_cif(prototype, &frame);

    let raw = {
        let arg_list = frame.arg_list();
        // Safety: the declaration is the caller's contract; argument storage
        // lives in `frame`, which outlives `arg_list`.
        unsafe {
            invoke_raw(
                &cif,
                signature.address(),
                prototype.return_type,
                arg_list.as_slice(),
            )
        }
    };
    drop(frame);

    let value = raw.decode(prototype.return_type, |addr| {
        // Safety: a non-null `char*` result is read as a C string per the
        // declared return type.
        unsafe { CStr::from_ptr(addr as *const c_char) }
            .to_string_lossy()
            .into_owned()
    });

    trace!(result = %value, "native call returned");
    Ok(value)
}
