//! Dynamic FFI type descriptions and transport kinds
//!
//! `FfiType`/`Signature` are what the type front end hands over. `FfiKind` is
//! the raw classification of one type; `ScalarKind` is the subset that can
//! actually travel through the exchange buffer.

use serde::{Deserialize, Serialize};

/// Type-kind tag of a resolved C type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FfiTypeKind {
    /// `void`
    Void,
    /// Signed integer of any width
    Signed,
    /// Unsigned integer of any width
    Unsigned,
    /// IEEE double
    Double,
    /// IEEE single float
    Float,
    /// Any data or function pointer
    Pointer,
    /// Aggregate passed by value
    Struct,
}

/// A resolved C type: kind tag plus byte size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FfiType {
    /// Kind tag
    pub kind: FfiTypeKind,
    /// Size in bytes (0 for void)
    pub size: usize,
}

impl FfiType {
    /// `void`
    pub const VOID: FfiType = FfiType::new(FfiTypeKind::Void, 0);
    /// `int8_t`
    pub const SINT8: FfiType = FfiType::new(FfiTypeKind::Signed, 1);
    /// `uint8_t`
    pub const UINT8: FfiType = FfiType::new(FfiTypeKind::Unsigned, 1);
    /// `int16_t`
    pub const SINT16: FfiType = FfiType::new(FfiTypeKind::Signed, 2);
    /// `uint16_t`
    pub const UINT16: FfiType = FfiType::new(FfiTypeKind::Unsigned, 2);
    /// `int32_t`
    pub const SINT32: FfiType = FfiType::new(FfiTypeKind::Signed, 4);
    /// `uint32_t`
    pub const UINT32: FfiType = FfiType::new(FfiTypeKind::Unsigned, 4);
    /// `int64_t`
    pub const SINT64: FfiType = FfiType::new(FfiTypeKind::Signed, 8);
    /// `uint64_t`
    pub const UINT64: FfiType = FfiType::new(FfiTypeKind::Unsigned, 8);
    /// `float`
    pub const FLOAT: FfiType = FfiType::new(FfiTypeKind::Float, 4);
    /// `double`
    pub const DOUBLE: FfiType = FfiType::new(FfiTypeKind::Double, 8);
    /// `void *`
    pub const POINTER: FfiType = FfiType::new(FfiTypeKind::Pointer, std::mem::size_of::<usize>());

    /// Create a type from its tag and size
    pub const fn new(kind: FfiTypeKind, size: usize) -> Self {
        FfiType { kind, size }
    }

    /// Machine-word signed integer (`long` on LP64, `intptr_t`)
    pub const fn slong() -> Self {
        FfiType::new(FfiTypeKind::Signed, std::mem::size_of::<isize>())
    }

    /// Machine-word unsigned integer
    pub const fn ulong() -> Self {
        FfiType::new(FfiTypeKind::Unsigned, std::mem::size_of::<usize>())
    }

    /// Raw kind of this type on a target with `word_size`-byte registers.
    ///
    /// Integers wider than a word become [`FfiKind::LongLong`] regardless of
    /// signedness.
    pub fn kind(&self, word_size: usize) -> FfiKind {
        match self.kind {
            FfiTypeKind::Void => FfiKind::Void,
            FfiTypeKind::Signed | FfiTypeKind::Unsigned if self.size > word_size => {
                FfiKind::LongLong
            }
            FfiTypeKind::Signed => FfiKind::Int,
            FfiTypeKind::Unsigned => FfiKind::Unsigned,
            FfiTypeKind::Double => FfiKind::Float,
            FfiTypeKind::Float => FfiKind::SingleFloat,
            FfiTypeKind::Pointer => FfiKind::Pointer,
            FfiTypeKind::Struct => FfiKind::Struct,
        }
    }

    /// Whether values of this type are read back with sign extension
    pub fn is_signed(&self) -> bool {
        self.kind != FfiTypeKind::Unsigned
    }
}

/// Raw classification of one FFI type, before transport normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FfiKind {
    /// No value
    Void,
    /// Signed integer that fits a word
    Int,
    /// Unsigned integer that fits a word
    Unsigned,
    /// 64-bit float
    Float,
    /// 32-bit float
    SingleFloat,
    /// 64-bit integer on a narrow-word target
    LongLong,
    /// Pointer; never passed as a raw scalar
    Pointer,
    /// By-value aggregate; never passed as a raw scalar
    Struct,
}

impl FfiKind {
    /// One-letter code (`v i u f S L * ?`)
    pub fn code(&self) -> char {
        match self {
            FfiKind::Void => 'v',
            FfiKind::Int => 'i',
            FfiKind::Unsigned => 'u',
            FfiKind::Float => 'f',
            FfiKind::SingleFloat => 'S',
            FfiKind::LongLong => 'L',
            FfiKind::Pointer => '*',
            FfiKind::Struct => '?',
        }
    }
}

impl std::fmt::Display for FfiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Transport kind of a scalar crossing the native call boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    /// No value (results only)
    Void,
    /// Word-sized or narrower integer, signed or not
    Int,
    /// 64-bit float
    Float,
    /// 32-bit float
    SingleFloat,
    /// 64-bit integer on a narrow-word target
    LongLong,
}

impl ScalarKind {
    /// One-letter code (`v i f S L`)
    pub fn code(&self) -> char {
        match self {
            ScalarKind::Void => 'v',
            ScalarKind::Int => 'i',
            ScalarKind::Float => 'f',
            ScalarKind::SingleFloat => 'S',
            ScalarKind::LongLong => 'L',
        }
    }

    /// Whether this kind is a floating-point kind
    pub fn is_float(&self) -> bool {
        matches!(self, ScalarKind::Float | ScalarKind::SingleFloat)
    }
}

impl std::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A classified type: transport kind, byte size and signedness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScalarType {
    /// Transport kind
    pub kind: ScalarKind,
    /// Declared size in bytes (0 for void)
    pub size: usize,
    /// Sign- (true) or zero-extend (false) integers when reading back
    pub signed: bool,
}

impl ScalarType {
    /// The void type
    pub const VOID: ScalarType = ScalarType { kind: ScalarKind::Void, size: 0, signed: true };

    /// Whether a value fits this type's transport kind
    pub fn accepts(&self, value: &ScalarValue) -> bool {
        matches!(
            (self.kind, value),
            (ScalarKind::Int | ScalarKind::LongLong, ScalarValue::Int(_))
                | (ScalarKind::Float, ScalarValue::Float(_))
                | (ScalarKind::SingleFloat, ScalarValue::SingleFloat(_))
        )
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ScalarKind::Void => write!(f, "void"),
            ScalarKind::Int | ScalarKind::LongLong => {
                let prefix = if self.signed { 'i' } else { 'u' };
                write!(f, "{}{}", prefix, self.size * 8)
            }
            ScalarKind::Float => write!(f, "f64"),
            ScalarKind::SingleFloat => write!(f, "f32"),
        }
    }
}

/// An unboxed scalar value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    /// Integer of any width, already sign- or zero-extended
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// 32-bit float
    SingleFloat(f32),
}

impl ScalarValue {
    /// Integer payload, if any
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Double payload, if any
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ScalarValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Int(v) => write!(f, "{}", v),
            ScalarValue::Float(v) => write!(f, "{}", v),
            ScalarValue::SingleFloat(v) => write!(f, "{}f", v),
        }
    }
}

/// Platform calling-convention tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Abi {
    /// The platform's default C convention
    #[default]
    Default,
    /// System V AMD64 / generic Unix
    SystemV,
    /// Microsoft x64
    WindowsFastcall,
    /// Apple's AArch64 variant of AAPCS64
    AppleAarch64,
}

impl std::fmt::Display for Abi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Abi::Default => "default",
            Abi::SystemV => "sysv",
            Abi::WindowsFastcall => "win64",
            Abi::AppleAarch64 => "apple-aarch64",
        };
        f.write_str(name)
    }
}

/// A dynamic native signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// Argument types in declaration order
    pub args: Vec<FfiType>,
    /// Result type
    pub result: FfiType,
    /// Calling convention
    pub abi: Abi,
}

impl Signature {
    /// Create a signature
    pub fn new(args: Vec<FfiType>, result: FfiType, abi: Abi) -> Self {
        Signature { args, result, abi }
    }

    /// Number of arguments
    pub fn nargs(&self) -> usize {
        self.args.len()
    }
}

/// What the executing CPU backend can carry in registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CpuCapabilities {
    /// 64-bit floats
    pub supports_floats: bool,
    /// 64-bit integers on a narrow-word target
    pub supports_longlong: bool,
    /// 32-bit floats
    pub supports_singlefloats: bool,
    /// Register width in bytes
    pub word_size: usize,
}

impl CpuCapabilities {
    /// Every capability enabled, at the host's word size
    pub const fn host() -> Self {
        CpuCapabilities {
            supports_floats: true,
            supports_longlong: true,
            supports_singlefloats: true,
            word_size: std::mem::size_of::<usize>(),
        }
    }

    /// Integers only
    pub const fn integer_only(word_size: usize) -> Self {
        CpuCapabilities {
            supports_floats: false,
            supports_longlong: false,
            supports_singlefloats: false,
            word_size,
        }
    }
}

impl Default for CpuCapabilities {
    fn default() -> Self {
        Self::host()
    }
}
