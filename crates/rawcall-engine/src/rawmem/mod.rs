//! Raw, untyped memory
//!
//! Explicitly-sized byte buffers that are never traced or moved by a garbage
//! collector. Every access names the scalar type the bytes are read as.
//!
//! Two access families exist:
//! - `get`/`set` require the offset to satisfy the type's alignment mask and
//!   fail loudly with [`AlignmentError`] otherwise
//! - `get_unaligned`/`set_unaligned` accept any offset; on hosts that do not
//!   tolerate misaligned scalar access the value is copied through an aligned
//!   scratch slot

mod align;
mod scalar;
mod storage;
mod tracker;

pub use align::{
    alignment_mask, check_alignment, mask_for_size, AlignmentError, UnalignedPolicy,
    ALIGNMENT_MASKS, MAXIMUM_ALIGNMENT,
};
pub use scalar::RawScalar;
pub use storage::{
    read_raw, read_raw_unaligned, write_raw, write_raw_unaligned, AllocOptions, RawStorage,
    STORAGE_ALIGNMENT,
};
pub use tracker::{AllocationStats, AllocationTracker};
