//! Type-kind classification against the CPU's capabilities

use thiserror::Error;

use super::types::{CpuCapabilities, FfiKind, FfiType, ScalarKind, ScalarType};

/// The type cannot travel through the exchange buffer on this target.
///
/// Not a user error: callers fall back to a non-accelerated call path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnsupportedKind {
    /// The CPU cannot carry this kind at all
    #[error("unsupported kind '{kind}'")]
    Kind {
        /// The raw kind that was rejected
        kind: FfiKind,
    },
    /// The kind is carried, but not at this width
    #[error("unsupported {size}-byte kind '{kind}'")]
    Size {
        /// The raw kind of the type
        kind: FfiKind,
        /// Its declared size in bytes
        size: usize,
    },
}

impl UnsupportedKind {
    /// The raw kind of the rejected type
    pub fn kind(&self) -> FfiKind {
        match *self {
            UnsupportedKind::Kind { kind } | UnsupportedKind::Size { kind, .. } => kind,
        }
    }
}

/// Byte widths the exchange slots can load and store as integers
pub(crate) const C_INTEGER_SIZES: [usize; 4] = [1, 2, 4, 8];

/// Whether `size` is a width the exchange buffer carries for `kind`
fn size_fits(kind: FfiKind, size: usize) -> bool {
    match kind {
        FfiKind::Int | FfiKind::Unsigned => C_INTEGER_SIZES.contains(&size),
        FfiKind::LongLong | FfiKind::Float => size == 8,
        FfiKind::SingleFloat => size == 4,
        FfiKind::Void | FfiKind::Pointer | FfiKind::Struct => true,
    }
}

/// Classify `ty` into its transport kind.
///
/// Unsigned integers are normalized to [`ScalarKind::Int`]; the signedness
/// survives separately in [`classify_type`]. Integers must be 1, 2, 4 or 8
/// bytes wide, doubles 8 and floats 4.
pub fn classify(cpu: &CpuCapabilities, ty: &FfiType) -> Result<ScalarKind, UnsupportedKind> {
    let kind = ty.kind(cpu.word_size);
    if !size_fits(kind, ty.size) {
        return Err(UnsupportedKind::Size { kind, size: ty.size });
    }
    let scalar = match kind {
        FfiKind::Void => ScalarKind::Void,
        FfiKind::Int | FfiKind::Unsigned => ScalarKind::Int,
        FfiKind::Float if cpu.supports_floats => ScalarKind::Float,
        FfiKind::LongLong if cpu.supports_longlong => ScalarKind::LongLong,
        FfiKind::SingleFloat if cpu.supports_singlefloats => ScalarKind::SingleFloat,
        FfiKind::Float
        | FfiKind::LongLong
        | FfiKind::SingleFloat
        | FfiKind::Pointer
        | FfiKind::Struct => return Err(UnsupportedKind::Kind { kind }),
    };
    Ok(scalar)
}

/// Classify `ty` and keep its declared size and signedness
pub fn classify_type(cpu: &CpuCapabilities, ty: &FfiType) -> Result<ScalarType, UnsupportedKind> {
    let kind = classify(cpu, ty)?;
    let size = if kind == ScalarKind::Void { 0 } else { ty.size };
    Ok(ScalarType { kind, size, signed: ty.is_signed() })
}
