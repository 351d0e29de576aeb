//! Argument Marshaling
//!
//! Converts Rust values into the storage a native call reads its arguments
//! from. A [`MarshaledArgs`] frame owns every buffer; the libffi argument
//! list only borrows it, so nothing the native side can see is released
//! before the call returns.

use std::ffi::{c_char, c_void, CString};
use std::marker::PhantomData;

use libffi::middle::{arg, Arg, Type};

use super::error::{FfiError, FfiResult, MismatchKind};
use super::types::{FfiType, FfiValue, Prototype};

/// Storage for one argument
#[derive(Debug)]
enum Slot {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    ISize(isize),
    USize(usize),
    F32(f32),
    F64(f64),
    Ptr(*mut c_void),
    /// `ptr` points into `buffer`'s heap allocation, which does not move
    /// when the slot does
    Text {
        buffer: CString,
        ptr: *const c_char,
    },
}

impl Slot {
    fn from_int(ty: FfiType, value: i128) -> Slot {
        match ty {
            FfiType::I8 => Slot::I8(value as i8),
            FfiType::I16 => Slot::I16(value as i16),
            FfiType::I32 => Slot::I32(value as i32),
            FfiType::I64 => Slot::I64(value as i64),
            FfiType::U8 => Slot::U8(value as u8),
            FfiType::U16 => Slot::U16(value as u16),
            FfiType::U32 => Slot::U32(value as u32),
            FfiType::U64 => Slot::U64(value as u64),
            FfiType::ISize => Slot::ISize(value as isize),
            _ => Slot::USize(value as usize),
        }
    }

    fn text(buffer: CString) -> Slot {
        let ptr = buffer.as_ptr();
        Slot::Text { buffer, ptr }
    }

    fn as_arg(&self) -> Arg {
        match self {
            Slot::I8(v) => arg(v),
            Slot::I16(v) => arg(v),
            Slot::I32(v) => arg(v),
            Slot::I64(v) => arg(v),
            Slot::U8(v) => arg(v),
            Slot::U16(v) => arg(v),
            Slot::U32(v) => arg(v),
            Slot::U64(v) => arg(v),
            Slot::ISize(v) => arg(v),
            Slot::USize(v) => arg(v),
            Slot::F32(v) => arg(v),
            Slot::F64(v) => arg(v),
            Slot::Ptr(p) => arg(p),
            Slot::Text { ptr, .. } => arg(ptr),
        }
    }
}

/// libffi type for a declared type
pub(crate) fn ffi_type(ty: FfiType) -> Type {
    match ty {
        FfiType::Void => Type::void(),
        FfiType::I8 => Type::i8(),
        FfiType::I16 => Type::i16(),
        FfiType::I32 => Type::i32(),
        FfiType::I64 => Type::i64(),
        FfiType::U8 => Type::u8(),
        FfiType::U16 => Type::u16(),
        FfiType::U32 => Type::u32(),
        FfiType::U64 => Type::u64(),
        FfiType::ISize => Type::isize(),
        FfiType::USize => Type::usize(),
        FfiType::F32 => Type::f32(),
        FfiType::F64 => Type::f64(),
        FfiType::Ptr | FfiType::CStr => Type::pointer(),
    }
}

/// The argument frame of one native call
#[derive(Debug)]
pub struct MarshaledArgs {
    slots: Vec<Slot>,
    types: Vec<FfiType>,
    fixed: usize,
}

impl MarshaledArgs {
    /// Check `args` against `prototype` and marshal them.
    ///
    /// Fixed parameters are coerced to their declared types. Variadic extras
    /// are passed as their own literal type after C default argument
    /// promotion.
    pub fn new(prototype: &Prototype, args: &[FfiValue]) -> FfiResult<Self> {
        let mismatch = |kind: MismatchKind| FfiError::mismatch(&prototype.name, kind);

        if !prototype.check_arity(args.len()) {
            return Err(mismatch(MismatchKind::Arity {
                expected: prototype.params.len(),
                got: args.len(),
                variadic: prototype.variadic,
            }));
        }

        let fixed = prototype.params.len();
        let mut slots = Vec::with_capacity(args.len());
        let mut types = Vec::with_capacity(args.len());

        for (index, value) in args.iter().enumerate() {
            let ty = match prototype.params.get(index) {
                Some(declared) => *declared,
                None if value.is_void() => {
                    return Err(mismatch(MismatchKind::Value {
                        index,
                        expected: FfiType::Void,
                        reason: "void is not a value".to_string(),
                    }))
                }
                None => value.ty().promoted(),
            };
            slots.push(coerce(index, value, ty).map_err(mismatch)?);
            types.push(ty);
        }

        Ok(Self {
            slots,
            types,
            fixed,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of fixed (non-variadic) arguments
    pub fn fixed_count(&self) -> usize {
        self.fixed
    }

    /// Native type of each argument in call order
    pub fn arg_types(&self) -> &[FfiType] {
        &self.types
    }

    /// Bytes the native side sees for a text argument, terminator included
    pub fn text_bytes(&self, index: usize) -> Option<&[u8]> {
        match self.slots.get(index)? {
            Slot::Text { buffer, .. } => Some(buffer.as_bytes_with_nul()),
            _ => None,
        }
    }

    /// Address passed for a text argument
    pub fn text_ptr(&self, index: usize) -> Option<*const c_char> {
        match self.slots.get(index)? {
            Slot::Text { ptr, .. } => Some(*ptr),
            _ => None,
        }
    }

    /// libffi argument list pointing into this frame
    pub fn arg_list(&self) -> ArgList<'_> {
        ArgList {
            args: self.slots.iter().map(Slot::as_arg).collect(),
            _frame: PhantomData,
        }
    }
}

/// Argument pointers for one call, valid while the frame is borrowed
pub struct ArgList<'frame> {
    args: Vec<Arg>,
    _frame: PhantomData<&'frame MarshaledArgs>,
}

impl ArgList<'_> {
    pub fn as_slice(&self) -> &[Arg] {
        &self.args
    }
}

fn coerce(index: usize, value: &FfiValue, ty: FfiType) -> Result<Slot, MismatchKind> {
    let type_mismatch = || MismatchKind::Type {
        index,
        expected: ty,
        got: value.ty(),
    };
    let bad_value = |reason: String| MismatchKind::Value {
        index,
        expected: ty,
        reason,
    };

    if let Some((min, max)) = ty.int_range() {
        let n = value.as_i128().ok_or_else(type_mismatch)?;
        if n < min || n > max {
            return Err(bad_value(format!("{} is out of range", n)));
        }
        return Ok(Slot::from_int(ty, n));
    }

    match (ty, value) {
        (FfiType::F64, FfiValue::F64(v)) => Ok(Slot::F64(*v)),
        (FfiType::F64, FfiValue::F32(v)) => Ok(Slot::F64(*v as f64)),
        (FfiType::F32, FfiValue::F32(v)) => Ok(Slot::F32(*v)),
        (FfiType::F32, FfiValue::F64(v)) => {
            let narrowed = *v as f32;
            if narrowed as f64 == *v || v.is_nan() {
                Ok(Slot::F32(narrowed))
            } else {
                Err(bad_value(format!("{} is not exactly representable", v)))
            }
        }
        (FfiType::CStr, FfiValue::Text(s)) => CString::new(s.as_bytes())
            .map(Slot::text)
            .map_err(|e| {
                bad_value(format!(
                    "text contains a NUL byte at offset {}",
                    e.nul_position()
                ))
            }),
        (FfiType::CStr | FfiType::Ptr, FfiValue::Ptr(p)) => Ok(Slot::Ptr(*p as *mut c_void)),
        _ => Err(type_mismatch()),
    }
}
