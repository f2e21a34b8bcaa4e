//! Alignment masks and the host's misaligned-access policy

use once_cell::sync::Lazy;
use thiserror::Error;

/// Upper bound on the alignment a raw access ever requires.
///
/// 64-bit scalars on 32-bit hosts are still required to be 8-byte aligned.
pub const MAXIMUM_ALIGNMENT: usize = 8;

/// Raised by the checked accessors when an offset does not satisfy the
/// alignment of the scalar being accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unaligned raw access: offset {offset} for a {size}-byte scalar (mask {mask:#x})")]
pub struct AlignmentError {
    /// Offset (or address) that failed the test
    pub offset: usize,
    /// Size of the scalar being accessed
    pub size: usize,
    /// Mask the offset was tested against
    pub mask: usize,
}

/// Alignment mask for a scalar of `size` bytes.
///
/// The alignment is the largest power of two that divides `size` and does not
/// exceed [`MAXIMUM_ALIGNMENT`]; the mask is that alignment minus one.
pub const fn alignment_mask(size: usize) -> usize {
    let mut alignment = 1;
    while size & alignment == 0 && alignment < MAXIMUM_ALIGNMENT {
        alignment *= 2;
    }
    alignment - 1
}

const fn build_mask_table() -> [usize; 17] {
    let mut table = [0; 17];
    let mut size = 0;
    while size < table.len() {
        table[size] = alignment_mask(size);
        size += 1;
    }
    table
}

/// Precomputed masks for every scalar size from 0 to 16 bytes.
pub const ALIGNMENT_MASKS: [usize; 17] = build_mask_table();

/// Alignment mask for `size`, served from [`ALIGNMENT_MASKS`] when possible.
#[inline]
pub fn mask_for_size(size: usize) -> usize {
    match ALIGNMENT_MASKS.get(size) {
        Some(&mask) => mask,
        None => alignment_mask(size),
    }
}

/// Check that `offset` is aligned for a scalar of `size` bytes.
#[inline]
pub fn check_alignment(size: usize, offset: usize) -> Result<(), AlignmentError> {
    let mask = mask_for_size(size);
    if offset & mask != 0 {
        return Err(AlignmentError { offset, size, mask });
    }
    Ok(())
}

/// How unaligned accesses are carried out on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnalignedPolicy {
    /// The CPU tolerates misaligned scalar loads and stores (x86 family)
    Direct,
    /// Misaligned addresses go through an aligned scratch copy
    CopyThroughScratch,
}

static HOST_POLICY: Lazy<UnalignedPolicy> = Lazy::new(|| {
    let policy = if cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
        UnalignedPolicy::Direct
    } else {
        UnalignedPolicy::CopyThroughScratch
    };
    tracing::debug!(?policy, arch = std::env::consts::ARCH, "probed unaligned access policy");
    policy
});

impl UnalignedPolicy {
    /// Policy for the running CPU family, probed once per process.
    #[inline]
    pub fn host() -> Self {
        *HOST_POLICY
    }

    /// Whether misaligned scalar access is fine without a fallback
    #[inline]
    pub fn misaligned_is_fine(&self) -> bool {
        matches!(self, UnalignedPolicy::Direct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_for_scalar_sizes() {
        assert_eq!(alignment_mask(1), 0);
        assert_eq!(alignment_mask(2), 1);
        assert_eq!(alignment_mask(4), 3);
        assert_eq!(alignment_mask(8), 7);
    }

    #[test]
    fn test_masks_capped_at_maximum_alignment() {
        assert_eq!(alignment_mask(16), 7);
        assert_eq!(mask_for_size(32), 7);
    }

    #[test]
    fn test_masks_for_odd_sizes() {
        // 12 = 4 * 3, so only 4-byte alignment divides it
        assert_eq!(alignment_mask(12), 3);
        assert_eq!(alignment_mask(6), 1);
        assert_eq!(alignment_mask(3), 0);
    }

    #[test]
    fn test_table_matches_function() {
        for size in 0..ALIGNMENT_MASKS.len() {
            assert_eq!(ALIGNMENT_MASKS[size], alignment_mask(size), "size {}", size);
        }
    }

    #[test]
    fn test_check_alignment() {
        assert!(check_alignment(8, 16).is_ok());
        assert!(check_alignment(4, 12).is_ok());
        assert!(check_alignment(1, 13).is_ok());
        let err = check_alignment(8, 12).unwrap_err();
        assert_eq!(err, AlignmentError { offset: 12, size: 8, mask: 7 });
    }

    #[test]
    fn test_host_policy_matches_arch() {
        let expected = cfg!(any(target_arch = "x86", target_arch = "x86_64"));
        assert_eq!(UnalignedPolicy::host().misaligned_is_fine(), expected);
    }
}
