//! FFI Type System
//!
//! Declared native types, the Rust-side values that cross the boundary, and
//! function prototypes parsed from C declarations.

use std::fmt;
use std::mem::size_of;
use std::os::raw::{c_char, c_long};
use std::str::FromStr;

use super::error::FfiError;

/// Native types supported for parameters and return values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfiType {
    /// Void (no value, return position only)
    Void,
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 8-bit unsigned integer
    U8,
    /// 16-bit unsigned integer
    U16,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit unsigned integer
    U64,
    /// Pointer-sized signed integer (ssize_t)
    ISize,
    /// Pointer-sized unsigned integer (size_t)
    USize,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
    /// Opaque pointer (void*)
    Ptr,
    /// Null-terminated C string (const char*)
    CStr,
}

impl FfiType {
    /// Get the size in bytes of this type
    pub fn size(&self) -> usize {
        match self {
            FfiType::Void => 0,
            FfiType::U8 | FfiType::I8 => 1,
            FfiType::U16 | FfiType::I16 => 2,
            FfiType::U32 | FfiType::I32 | FfiType::F32 => 4,
            FfiType::U64 | FfiType::I64 | FfiType::F64 => 8,
            FfiType::ISize | FfiType::USize | FfiType::Ptr | FfiType::CStr => size_of::<usize>(),
        }
    }

    /// Check if this type is an integer type
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FfiType::U8
                | FfiType::U16
                | FfiType::U32
                | FfiType::U64
                | FfiType::USize
                | FfiType::I8
                | FfiType::I16
                | FfiType::I32
                | FfiType::I64
                | FfiType::ISize
        )
    }

    /// Check if this type is a signed integer type
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            FfiType::I8 | FfiType::I16 | FfiType::I32 | FfiType::I64 | FfiType::ISize
        )
    }

    /// Check if this type is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, FfiType::F32 | FfiType::F64)
    }

    /// Check if this type is a pointer type
    pub fn is_pointer(&self) -> bool {
        matches!(self, FfiType::Ptr | FfiType::CStr)
    }

    /// The type a value of this type is passed as in a variadic position.
    ///
    /// C default argument promotion: integers narrower than `int` become
    /// `int` (or `unsigned int`), `float` becomes `double`.
    pub fn promoted(&self) -> FfiType {
        match self {
            FfiType::I8 | FfiType::I16 => FfiType::I32,
            FfiType::U8 | FfiType::U16 => FfiType::U32,
            FfiType::F32 => FfiType::F64,
            other => *other,
        }
    }

    /// Inclusive value range of an integer type, widened to i128
    pub(crate) fn int_range(&self) -> Option<(i128, i128)> {
        let range = match self {
            FfiType::I8 => (i8::MIN as i128, i8::MAX as i128),
            FfiType::I16 => (i16::MIN as i128, i16::MAX as i128),
            FfiType::I32 => (i32::MIN as i128, i32::MAX as i128),
            FfiType::I64 => (i64::MIN as i128, i64::MAX as i128),
            FfiType::ISize => (isize::MIN as i128, isize::MAX as i128),
            FfiType::U8 => (0, u8::MAX as i128),
            FfiType::U16 => (0, u16::MAX as i128),
            FfiType::U32 => (0, u32::MAX as i128),
            FfiType::U64 => (0, u64::MAX as i128),
            FfiType::USize => (0, usize::MAX as i128),
            _ => return None,
        };
        Some(range)
    }

    /// Parse a single type name: Rust-style, C, or fixed-width typedef
    fn from_name(name: &str) -> Option<Self> {
        let long = if size_of::<c_long>() == 8 {
            FfiType::I64
        } else {
            FfiType::I32
        };
        let ulong = if size_of::<c_long>() == 8 {
            FfiType::U64
        } else {
            FfiType::U32
        };

        // Plain `char` takes the target's signedness
        let plain_char = if c_char::MIN == 0 {
            FfiType::U8
        } else {
            FfiType::I8
        };

        let ty = match name {
            "void" => FfiType::Void,
            "char" => plain_char,
            "i8" | "int8" | "int8_t" | "signed char" => FfiType::I8,
            "u8" | "uint8" | "uint8_t" | "unsigned char" | "byte" => FfiType::U8,
            "i16" | "int16" | "int16_t" | "short" | "short int" | "signed short" => FfiType::I16,
            "u16" | "uint16" | "uint16_t" | "unsigned short" | "unsigned short int" => {
                FfiType::U16
            }
            "i32" | "int32" | "int32_t" | "int" | "signed" | "signed int" => FfiType::I32,
            "u32" | "uint32" | "uint32_t" | "unsigned" | "unsigned int" => FfiType::U32,
            "i64" | "int64" | "int64_t" | "long long" | "long long int" | "signed long long" => {
                FfiType::I64
            }
            "u64" | "uint64" | "uint64_t" | "unsigned long long" | "unsigned long long int" => {
                FfiType::U64
            }
            "long" | "long int" | "signed long" => long,
            "ulong" | "unsigned long" | "unsigned long int" => ulong,
            "isize" | "ssize_t" | "intptr_t" | "ptrdiff_t" => FfiType::ISize,
            "usize" | "size_t" | "uintptr_t" => FfiType::USize,
            "f32" | "float" => FfiType::F32,
            "f64" | "double" => FfiType::F64,
            "ptr" | "pointer" => FfiType::Ptr,
            "cstr" | "string" => FfiType::CStr,
            _ => return None,
        };
        Some(ty)
    }

    /// Parse a C type expression such as `const char*`, `unsigned long` or
    /// `struct stat *`.
    ///
    /// Qualifiers are ignored. `char*` is a C string, every other pointer is
    /// opaque.
    pub fn from_c_type(text: &str) -> Option<Self> {
        let stars = text.chars().filter(|&c| c == '*').count();
        let without_stars = text.replace('*', " ");
        let words: Vec<&str> = without_stars
            .split_whitespace()
            .filter(|w| !is_qualifier(w))
            .collect();
        if words.is_empty() {
            return None;
        }
        let base = words.join(" ");

        match stars {
            0 => Self::from_name(&base),
            1 if base == "char" => Some(FfiType::CStr),
            _ => Some(FfiType::Ptr),
        }
    }
}

impl FromStr for FfiType {
    type Err = FfiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_c_type(s)
            .ok_or_else(|| FfiError::InvalidDeclaration(format!("unknown type '{}'", s.trim())))
    }
}

impl fmt::Display for FfiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FfiType::Void => "void",
            FfiType::I8 => "i8",
            FfiType::I16 => "i16",
            FfiType::I32 => "i32",
            FfiType::I64 => "i64",
            FfiType::U8 => "u8",
            FfiType::U16 => "u16",
            FfiType::U32 => "u32",
            FfiType::U64 => "u64",
            FfiType::ISize => "isize",
            FfiType::USize => "usize",
            FfiType::F32 => "f32",
            FfiType::F64 => "f64",
            FfiType::Ptr => "ptr",
            FfiType::CStr => "cstr",
        };
        f.write_str(name)
    }
}

/// A value that can be passed to or returned from a native function
#[derive(Debug, Clone, PartialEq)]
pub enum FfiValue {
    /// No value
    Void,
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
    /// Opaque native address
    Ptr(usize),
    /// Text, marshaled as a null-terminated byte buffer
    Text(String),
}

impl FfiValue {
    /// The literal type of this value
    pub fn ty(&self) -> FfiType {
        match self {
            FfiValue::Void => FfiType::Void,
            FfiValue::I8(_) => FfiType::I8,
            FfiValue::I16(_) => FfiType::I16,
            FfiValue::I32(_) => FfiType::I32,
            FfiValue::I64(_) => FfiType::I64,
            FfiValue::U8(_) => FfiType::U8,
            FfiValue::U16(_) => FfiType::U16,
            FfiValue::U32(_) => FfiType::U32,
            FfiValue::U64(_) => FfiType::U64,
            FfiValue::ISize(_) => FfiType::ISize,
            FfiValue::USize(_) => FfiType::USize,
            FfiValue::F32(_) => FfiType::F32,
            FfiValue::F64(_) => FfiType::F64,
            FfiValue::Ptr(_) => FfiType::Ptr,
            FfiValue::Text(_) => FfiType::CStr,
        }
    }

    /// Integer payload widened to i128, for range checks
    pub(crate) fn as_i128(&self) -> Option<i128> {
        let v = match *self {
            FfiValue::I8(v) => v as i128,
            FfiValue::I16(v) => v as i128,
            FfiValue::I32(v) => v as i128,
            FfiValue::I64(v) => v as i128,
            FfiValue::U8(v) => v as i128,
            FfiValue::U16(v) => v as i128,
            FfiValue::U32(v) => v as i128,
            FfiValue::U64(v) => v as i128,
            FfiValue::ISize(v) => v as i128,
            FfiValue::USize(v) => v as i128,
            _ => return None,
        };
        Some(v)
    }

    /// Integer payload as i64, if it is an integer that fits
    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    /// Integer payload as u64, if it is a non-negative integer that fits
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|v| u64::try_from(v).ok())
    }

    /// Floating point payload as f64
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            FfiValue::F32(v) => Some(v as f64),
            FfiValue::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FfiValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ptr(&self) -> Option<usize> {
        match *self {
            FfiValue::Ptr(p) => Some(p),
            _ => None,
        }
    }

    /// Check if this is a void value
    pub fn is_void(&self) -> bool {
        matches!(self, FfiValue::Void)
    }
}

impl fmt::Display for FfiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FfiValue::Void => write!(f, "void"),
            FfiValue::F32(v) => write!(f, "{}", v),
            FfiValue::F64(v) => write!(f, "{}", v),
            FfiValue::Ptr(p) => write!(f, "{:#x}", p),
            FfiValue::Text(s) => write!(f, "{:?}", s),
            other => match other.as_i128() {
                Some(v) => write!(f, "{}", v),
                None => write!(f, "{:?}", other),
            },
        }
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for FfiValue {
                fn from(value: $ty) -> Self {
                    FfiValue::$variant(value)
                }
            }
        )*
    };
}

impl_from_primitive! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    isize => ISize,
    usize => USize,
    f32 => F32,
    f64 => F64,
    String => Text,
}

impl From<&str> for FfiValue {
    fn from(value: &str) -> Self {
        FfiValue::Text(value.to_string())
    }
}

impl<T> From<*const T> for FfiValue {
    fn from(value: *const T) -> Self {
        FfiValue::Ptr(value as usize)
    }
}

impl<T> From<*mut T> for FfiValue {
    fn from(value: *mut T) -> Self {
        FfiValue::Ptr(value as usize)
    }
}

/// Declared shape of a native function, independent of any library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prototype {
    /// Function name, matched exactly against exported symbols
    pub name: String,
    /// Fixed parameter types
    pub params: Vec<FfiType>,
    /// Return type
    pub return_type: FfiType,
    /// Whether trailing arguments follow the fixed ones
    pub variadic: bool,
}

impl Prototype {
    /// Create a fixed-arity prototype
    pub fn new(name: impl Into<String>, params: Vec<FfiType>, return_type: FfiType) -> Self {
        Self {
            name: name.into(),
            params,
            return_type,
            variadic: false,
        }
    }

    /// Create a variadic prototype
    pub fn variadic(name: impl Into<String>, params: Vec<FfiType>, return_type: FfiType) -> Self {
        Self {
            name: name.into(),
            params,
            return_type,
            variadic: true,
        }
    }

    /// Check whether `arg_count` arguments fit this prototype
    pub fn check_arity(&self, arg_count: usize) -> bool {
        if self.variadic {
            arg_count >= self.params.len()
        } else {
            arg_count == self.params.len()
        }
    }

    /// Reject prototypes no call could ever satisfy
    pub fn validate(&self) -> Result<(), FfiError> {
        if self.name.is_empty() {
            return Err(FfiError::InvalidDeclaration(
                "function name is empty".to_string(),
            ));
        }
        if let Some(index) = self.params.iter().position(|t| *t == FfiType::Void) {
            return Err(FfiError::InvalidDeclaration(format!(
                "parameter {} of '{}' is void",
                index, self.name
            )));
        }
        Ok(())
    }

    /// Parse a C declaration.
    ///
    /// Format: `return_type name(param_type [param_name], ..., ...);`
    ///
    /// ```
    /// use native_bridge::ffi::{FfiType, Prototype};
    ///
    /// let proto = Prototype::parse("int printf(const char* format, ...);").unwrap();
    /// assert_eq!(proto.name, "printf");
    /// assert_eq!(proto.params, vec![FfiType::CStr]);
    /// assert!(proto.variadic);
    /// ```
    pub fn parse(declaration: &str) -> Result<Self, FfiError> {
        let invalid = |msg: &str| {
            FfiError::InvalidDeclaration(format!("{}: '{}'", msg, declaration.trim()))
        };

        let decl = declaration.trim().trim_end_matches(';').trim_end();
        let decl = decl.strip_prefix("extern ").unwrap_or(decl).trim_start();

        let open = decl.find('(').ok_or_else(|| invalid("missing '('"))?;
        let close = decl.rfind(')').ok_or_else(|| invalid("missing ')'"))?;
        if close < open || !decl[close + 1..].trim().is_empty() {
            return Err(invalid("unbalanced parameter list"));
        }

        // Return type and name: the name is the trailing identifier
        let head = decl[..open].trim_end();
        let name_start = head
            .char_indices()
            .rev()
            .find(|&(_, c)| !is_ident_char(c))
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        let name = &head[name_start..];
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(invalid("missing function name"));
        }
        if !head[..name_start].is_ascii() {
            return Err(invalid("function name is not a C identifier"));
        }
        let return_type = FfiType::from_c_type(&head[..name_start])
            .ok_or_else(|| invalid("unknown return type"))?;

        let body = decl[open + 1..close].trim();
        let mut params = Vec::new();
        let mut variadic = false;

        if !body.is_empty() && body != "void" {
            let parts: Vec<&str> = body.split(',').map(str::trim).collect();
            for (i, part) in parts.iter().enumerate() {
                if *part == "..." {
                    if i + 1 != parts.len() {
                        return Err(invalid("'...' must be the last parameter"));
                    }
                    variadic = true;
                    continue;
                }
                let ty = parse_param(part).ok_or_else(|| invalid("unknown parameter type"))?;
                params.push(ty);
            }
        }

        let proto = Self {
            name: name.to_string(),
            params,
            return_type,
            variadic,
        };
        proto.validate()?;
        Ok(proto)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_qualifier(word: &str) -> bool {
    matches!(word, "const" | "volatile" | "restrict" | "__restrict")
}

/// Parse one parameter, dropping an optional parameter name
fn parse_param(text: &str) -> Option<FfiType> {
    if text.is_empty() {
        return None;
    }

    // `const char *restrict fmt`: after the last '*' come qualifiers and
    // an optional name
    if let Some(star) = text.rfind('*') {
        let mut words = text[star + 1..]
            .split_whitespace()
            .filter(|w| !is_qualifier(w));
        let name = words.next().unwrap_or("");
        if words.next().is_some()
            || !name.chars().all(is_ident_char)
            || (!name.is_empty() && FfiType::from_name(name).is_some())
        {
            return None;
        }
        return FfiType::from_c_type(&text[..=star]);
    }

    if let Some(ty) = FfiType::from_c_type(text) {
        return Some(ty);
    }
    let (ty, name) = text.rsplit_once(char::is_whitespace)?;
    if !name.chars().all(is_ident_char) {
        return None;
    }
    FfiType::from_c_type(ty)
}

impl FromStr for Prototype {
    type Err = FfiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.return_type, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        if self.variadic {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}
