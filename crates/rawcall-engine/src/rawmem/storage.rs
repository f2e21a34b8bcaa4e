//! Raw storage buffers and pointer-level scalar access

use std::alloc::{alloc, alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};

use super::align::{check_alignment, AlignmentError, UnalignedPolicy};
use super::scalar::RawScalar;
use super::tracker::AllocationTracker;

/// Alignment of every raw storage base address.
///
/// Matches the exchange-buffer stride so that slot bases inherit it.
pub const STORAGE_ALIGNMENT: usize = 16;

/// Options for [`RawStorage::alloc`]
#[derive(Debug, Clone, Default)]
pub struct AllocOptions {
    /// Tracker to account this allocation against (leak detection)
    pub tracker: Option<AllocationTracker>,
}

impl AllocOptions {
    /// Options accounting the allocation against `tracker`
    pub fn tracked(tracker: &AllocationTracker) -> Self {
        AllocOptions { tracker: Some(tracker.clone()) }
    }
}

/// An untyped, explicitly-owned byte buffer of fixed size.
///
/// Not traced or moved by any collector. Released by [`RawStorage::free`] or
/// on drop.
pub struct RawStorage {
    ptr: NonNull<u8>,
    size: usize,
    tracker: Option<AllocationTracker>,
}

// Safety: RawStorage owns its allocation exclusively, like Box<[u8]>; mutation
// requires &mut.
unsafe impl Send for RawStorage {}
unsafe impl Sync for RawStorage {}

fn storage_layout(size: usize) -> Layout {
    match Layout::from_size_align(size.max(1), STORAGE_ALIGNMENT) {
        Ok(layout) => layout,
        Err(_) => panic!("raw storage size overflow: {} bytes", size),
    }
}

impl RawStorage {
    /// Allocate `size` zero-initialized bytes.
    ///
    /// # Panics
    ///
    /// Aborts through the global allocation error handler when out of memory.
    pub fn alloc(size: usize, opts: AllocOptions) -> Self {
        let layout = storage_layout(size);
        // Safety: layout has non-zero size
        let raw = unsafe { alloc_zeroed(layout) };
        Self::from_raw_alloc(raw, layout, size, opts.tracker)
    }

    /// Allocate `size` bytes without initializing them.
    ///
    /// # Safety
    ///
    /// Every byte must be written before it is read.
    pub unsafe fn alloc_uninit(size: usize, opts: AllocOptions) -> Self {
        let layout = storage_layout(size);
        let raw = alloc(layout);
        Self::from_raw_alloc(raw, layout, size, opts.tracker)
    }

    /// Untracked zero-initialized storage
    pub fn zeroed(size: usize) -> Self {
        Self::alloc(size, AllocOptions::default())
    }

    fn from_raw_alloc(
        raw: *mut u8,
        layout: Layout,
        size: usize,
        tracker: Option<AllocationTracker>,
    ) -> Self {
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => handle_alloc_error(layout),
        };
        if let Some(tracker) = &tracker {
            tracker.on_alloc(size);
        }
        RawStorage { ptr, size, tracker }
    }

    /// Release the storage
    pub fn free(self) {
        drop(self)
    }

    /// Size in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the storage holds zero bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Base address
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Mutable base address
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    fn assert_in_bounds(&self, offset: usize, size: usize) {
        let in_bounds = offset.checked_add(size).is_some_and(|end| end <= self.size);
        assert!(
            in_bounds,
            "raw storage access out of bounds: offset {} + {} > {}",
            offset, size, self.size
        );
    }

    /// Read a `T` at an aligned offset
    #[inline]
    pub fn get<T: RawScalar>(&self, offset: usize) -> Result<T, AlignmentError> {
        self.assert_in_bounds(offset, T::SIZE);
        check_alignment(T::SIZE, offset)?;
        // Safety: in bounds, and base is STORAGE_ALIGNMENT-aligned
        unsafe { read_raw(self.as_ptr(), offset) }
    }

    /// Write a `T` at an aligned offset
    #[inline]
    pub fn set<T: RawScalar>(&mut self, offset: usize, value: T) -> Result<(), AlignmentError> {
        self.assert_in_bounds(offset, T::SIZE);
        check_alignment(T::SIZE, offset)?;
        // Safety: in bounds, exclusive access through &mut self
        unsafe { write_raw(self.as_mut_ptr(), offset, value) }
    }

    /// Read a `T` at any offset, using the host policy
    #[inline]
    pub fn get_unaligned<T: RawScalar>(&self, offset: usize) -> T {
        self.get_unaligned_with(UnalignedPolicy::host(), offset)
    }

    /// Write a `T` at any offset, using the host policy
    #[inline]
    pub fn set_unaligned<T: RawScalar>(&mut self, offset: usize, value: T) {
        self.set_unaligned_with(UnalignedPolicy::host(), offset, value)
    }

    /// Read a `T` at any offset with an explicit policy
    #[inline]
    pub fn get_unaligned_with<T: RawScalar>(&self, policy: UnalignedPolicy, offset: usize) -> T {
        self.assert_in_bounds(offset, T::SIZE);
        // Safety: in bounds
        unsafe { read_raw_unaligned(policy, self.as_ptr(), offset) }
    }

    /// Write a `T` at any offset with an explicit policy
    #[inline]
    pub fn set_unaligned_with<T: RawScalar>(
        &mut self,
        policy: UnalignedPolicy,
        offset: usize,
        value: T,
    ) {
        self.assert_in_bounds(offset, T::SIZE);
        // Safety: in bounds, exclusive access through &mut self
        unsafe { write_raw_unaligned(policy, self.as_mut_ptr(), offset, value) }
    }
}

impl Drop for RawStorage {
    fn drop(&mut self) {
        // Safety: ptr was allocated with exactly this layout
        unsafe { dealloc(self.ptr.as_ptr(), storage_layout(self.size)) };
        if let Some(tracker) = &self.tracker {
            tracker.on_free(self.size);
        }
    }
}

impl std::fmt::Debug for RawStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawStorage")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .field("tracked", &self.tracker.is_some())
            .finish()
    }
}

// ============================================================================
// Pointer-level access
// ============================================================================

/// Read a `T` at `base + offset`, which must be aligned for `T`.
///
/// # Safety
///
/// `base + offset .. + size_of::<T>()` must be readable and initialized.
#[inline]
pub unsafe fn read_raw<T: RawScalar>(base: *const u8, offset: usize) -> Result<T, AlignmentError> {
    let addr = base.add(offset);
    check_alignment(T::SIZE, addr as usize).map_err(|e| AlignmentError { offset, ..e })?;
    Ok(addr.cast::<T>().read())
}

/// Write a `T` at `base + offset`, which must be aligned for `T`.
///
/// # Safety
///
/// `base + offset .. + size_of::<T>()` must be writable.
#[inline]
pub unsafe fn write_raw<T: RawScalar>(
    base: *mut u8,
    offset: usize,
    value: T,
) -> Result<(), AlignmentError> {
    let addr = base.add(offset);
    check_alignment(T::SIZE, addr as usize).map_err(|e| AlignmentError { offset, ..e })?;
    addr.cast::<T>().write(value);
    Ok(())
}

/// Read a `T` at `base + offset` regardless of alignment.
///
/// # Safety
///
/// Same as [`read_raw`].
#[inline]
pub unsafe fn read_raw_unaligned<T: RawScalar>(
    policy: UnalignedPolicy,
    base: *const u8,
    offset: usize,
) -> T {
    let addr = base.add(offset);
    match policy {
        UnalignedPolicy::Direct => addr.cast::<T>().read_unaligned(),
        UnalignedPolicy::CopyThroughScratch => {
            if addr as usize & T::ALIGN_MASK == 0 {
                return addr.cast::<T>().read();
            }
            let mut scratch = MaybeUninit::<T>::uninit();
            ptr::copy_nonoverlapping(addr, scratch.as_mut_ptr().cast::<u8>(), T::SIZE);
            scratch.assume_init()
        }
    }
}

/// Write a `T` at `base + offset` regardless of alignment.
///
/// # Safety
///
/// Same as [`write_raw`].
#[inline]
pub unsafe fn write_raw_unaligned<T: RawScalar>(
    policy: UnalignedPolicy,
    base: *mut u8,
    offset: usize,
    value: T,
) {
    let addr = base.add(offset);
    match policy {
        UnalignedPolicy::Direct => addr.cast::<T>().write_unaligned(value),
        UnalignedPolicy::CopyThroughScratch => {
            if addr as usize & T::ALIGN_MASK == 0 {
                addr.cast::<T>().write(value);
                return;
            }
            let scratch = MaybeUninit::new(value);
            ptr::copy_nonoverlapping(scratch.as_ptr().cast::<u8>(), addr, T::SIZE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICIES: [UnalignedPolicy; 2] =
        [UnalignedPolicy::Direct, UnalignedPolicy::CopyThroughScratch];

    #[test]
    fn test_alloc_is_zeroed_and_aligned() {
        let storage = RawStorage::zeroed(64);
        assert_eq!(storage.len(), 64);
        assert_eq!(storage.as_ptr() as usize % STORAGE_ALIGNMENT, 0);
        for offset in (0..64).step_by(8) {
            assert_eq!(storage.get::<u64>(offset).unwrap(), 0);
        }
    }

    #[test]
    fn test_zero_sized_storage() {
        let storage = RawStorage::zeroed(0);
        assert!(storage.is_empty());
        storage.free();
    }

    #[test]
    fn test_aligned_round_trip() {
        let mut storage = RawStorage::zeroed(32);
        storage.set::<i32>(4, -7).unwrap();
        storage.set::<f64>(8, 2.5).unwrap();
        storage.set::<u16>(18, 0xBEEF).unwrap();
        storage.set::<i8>(21, -1).unwrap();
        assert_eq!(storage.get::<i32>(4).unwrap(), -7);
        assert_eq!(storage.get::<f64>(8).unwrap(), 2.5);
        assert_eq!(storage.get::<u16>(18).unwrap(), 0xBEEF);
        assert_eq!(storage.get::<i8>(21).unwrap(), -1);
    }

    #[test]
    fn test_checked_access_rejects_misaligned_offsets() {
        let mut storage = RawStorage::zeroed(32);
        assert_eq!(
            storage.set::<f64>(3, 1.0),
            Err(AlignmentError { offset: 3, size: 8, mask: 7 })
        );
        assert!(storage.get::<u32>(2).is_err());
        assert!(storage.get::<u16>(1).is_err());
        // Single bytes are always aligned
        assert!(storage.get::<u8>(7).is_ok());
    }

    #[test]
    fn test_unaligned_round_trip_both_policies() {
        for policy in POLICIES {
            let mut storage = RawStorage::zeroed(32);
            storage.set_unaligned_with::<f64>(policy, 3, -1.25);
            storage.set_unaligned_with::<i32>(policy, 13, 0x1234_5678);
            storage.set_unaligned_with::<u64>(policy, 17, u64::MAX - 5);
            assert_eq!(storage.get_unaligned_with::<f64>(policy, 3), -1.25);
            assert_eq!(storage.get_unaligned_with::<i32>(policy, 13), 0x1234_5678);
            assert_eq!(storage.get_unaligned_with::<u64>(policy, 17), u64::MAX - 5);
        }
    }

    #[test]
    fn test_unaligned_write_leaves_neighbours_untouched() {
        let mut storage = RawStorage::zeroed(16);
        storage.set_unaligned_with::<u32>(UnalignedPolicy::CopyThroughScratch, 5, u32::MAX);
        assert_eq!(storage.get::<u8>(4).unwrap(), 0);
        assert_eq!(storage.get::<u8>(9).unwrap(), 0);
        for offset in 5..9 {
            assert_eq!(storage.get::<u8>(offset).unwrap(), 0xFF);
        }
    }

    #[test]
    fn test_unaligned_and_aligned_views_agree() {
        let mut storage = RawStorage::zeroed(16);
        storage.set::<i64>(8, -42).unwrap();
        for policy in POLICIES {
            assert_eq!(storage.get_unaligned_with::<i64>(policy, 8), -42);
        }
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_out_of_bounds_is_asserted() {
        let storage = RawStorage::zeroed(8);
        let _ = storage.get::<u64>(8);
    }

    #[test]
    fn test_tracked_allocations() {
        let tracker = AllocationTracker::new();
        let a = RawStorage::alloc(24, AllocOptions::tracked(&tracker));
        let b = unsafe { RawStorage::alloc_uninit(40, AllocOptions::tracked(&tracker)) };
        let stats = tracker.stats();
        assert_eq!(stats.live, 2);
        assert_eq!(stats.live_bytes, 64);
        a.free();
        drop(b);
        assert!(tracker.is_balanced());
        assert_eq!(tracker.stats().total, 2);
        assert_eq!(tracker.stats().live_bytes, 0);
    }

    #[test]
    fn test_raw_pointer_access_checks_real_address() {
        let mut storage = RawStorage::zeroed(32);
        let base = unsafe { storage.as_mut_ptr().add(1) };
        // offset 7 from an odd base is 8-aligned in absolute terms
        unsafe {
            write_raw::<u64>(base, 7, 99).unwrap();
            assert_eq!(read_raw::<u64>(base, 7).unwrap(), 99);
            assert!(read_raw::<u64>(base, 8).is_err());
        }
    }
}
