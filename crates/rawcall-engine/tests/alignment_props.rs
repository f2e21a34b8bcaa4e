//! Property tests for raw storage access.
//!
//! For every scalar type and buffer size:
//! 1. Aligned set/get round-trips at every aligned offset
//! 2. Unaligned set/get round-trips at every offset, under both policies
//! 3. The checked API rejects misaligned offsets

use proptest::prelude::*;
use rawcall_engine::rawmem::{mask_for_size, RawScalar, RawStorage, UnalignedPolicy};

const POLICIES: [UnalignedPolicy; 2] = [UnalignedPolicy::Direct, UnalignedPolicy::CopyThroughScratch];

fn check_round_trips<T>(value: T, size: usize, offset: usize) -> Result<(), TestCaseError>
where
    T: RawScalar + PartialEq + std::fmt::Debug,
{
    prop_assume!(size >= T::SIZE);
    let offset = offset % (size - T::SIZE + 1);
    let mut storage = RawStorage::zeroed(size);

    for policy in POLICIES {
        storage.set_unaligned_with(policy, offset, value);
        prop_assert_eq!(storage.get_unaligned_with::<T>(policy, offset), value);
    }

    if offset & T::ALIGN_MASK == 0 {
        storage.set(offset, value).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(storage.get::<T>(offset), Ok(value));
    } else {
        prop_assert!(storage.set(offset, value).is_err());
        prop_assert!(storage.get::<T>(offset).is_err());
    }
    Ok(())
}

proptest! {
    #[test]
    fn i8_round_trips(v: i8, size in 1usize..64, offset: usize) {
        check_round_trips(v, size, offset)?;
    }

    #[test]
    fn u16_round_trips(v: u16, size in 2usize..64, offset: usize) {
        check_round_trips(v, size, offset)?;
    }

    #[test]
    fn i32_round_trips(v: i32, size in 4usize..64, offset: usize) {
        check_round_trips(v, size, offset)?;
    }

    #[test]
    fn u64_round_trips(v: u64, size in 8usize..64, offset: usize) {
        check_round_trips(v, size, offset)?;
    }

    #[test]
    fn f32_round_trips(v in proptest::num::f32::NORMAL, size in 4usize..64, offset: usize) {
        check_round_trips(v, size, offset)?;
    }

    #[test]
    fn f64_round_trips(v in proptest::num::f64::NORMAL, size in 8usize..64, offset: usize) {
        check_round_trips(v, size, offset)?;
    }

    #[test]
    fn mask_is_power_of_two_minus_one(size in 1usize..=16) {
        let mask = mask_for_size(size);
        prop_assert!((mask + 1).is_power_of_two());
        prop_assert!(mask < 8);
        prop_assert_eq!(size % (mask + 1), 0);
    }

    #[test]
    fn unaligned_write_touches_only_its_bytes(v: u64, offset in 0usize..24) {
        let mut storage = RawStorage::zeroed(40);
        storage.set_unaligned(offset, v);
        for i in (0..offset).chain(offset + 8..40) {
            prop_assert_eq!(storage.get_unaligned::<u8>(i), 0);
        }
    }
}
