//! Scalar types that raw storage can be read and written as

use super::align::alignment_mask;

mod sealed {
    pub trait Sealed {}
}

/// A plain scalar that may be stored in raw memory.
///
/// Sealed: only fixed-width integers and IEEE floats qualify, since every bit
/// pattern of their size is a valid value.
pub trait RawScalar: Copy + Send + Sync + 'static + sealed::Sealed {
    /// Size in bytes
    const SIZE: usize = std::mem::size_of::<Self>();
    /// Mask an aligned offset must clear
    const ALIGN_MASK: usize = alignment_mask(std::mem::size_of::<Self>());
    /// Short name used in diagnostics
    const NAME: &'static str;
}

macro_rules! raw_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl RawScalar for $ty {
                const NAME: &'static str = stringify!($ty);
            }
        )*
    };
}

raw_scalar!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_masks() {
        assert_eq!(<u8 as RawScalar>::ALIGN_MASK, 0);
        assert_eq!(<i16 as RawScalar>::ALIGN_MASK, 1);
        assert_eq!(<f32 as RawScalar>::ALIGN_MASK, 3);
        assert_eq!(<f64 as RawScalar>::ALIGN_MASK, 7);
        assert_eq!(<u64 as RawScalar>::ALIGN_MASK, 7);
    }

    #[test]
    fn test_mask_never_exceeds_type_alignment_requirements() {
        // An offset passing the mask test must be a valid address offset for T
        // when the base is aligned to the maximum alignment.
        assert!(<f64 as RawScalar>::ALIGN_MASK + 1 >= std::mem::align_of::<f64>());
        assert!(<i32 as RawScalar>::ALIGN_MASK + 1 >= std::mem::align_of::<i32>());
        assert!(<usize as RawScalar>::ALIGN_MASK + 1 >= std::mem::align_of::<usize>());
    }
}
