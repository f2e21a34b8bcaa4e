//! Argument register assignment
//!
//! Decides how many leading call arguments travel in registers. The pass is
//! left-to-right over a monotonic slot cursor and stops for good at the first
//! argument that does not fit: every later argument goes on the stack, even
//! one that would still fit. Code generators rely on that shape, so it must
//! not be turned into skip-and-continue.

use serde::{Deserialize, Serialize};

use super::traits::TargetArch;
use crate::ffi::types::ScalarKind;

/// Monotonic cursor over a register file's abstract slots
#[derive(Debug, Clone, Copy)]
struct SlotCursor {
    next_free: usize,
    limit: usize,
}

impl SlotCursor {
    fn new(limit: usize) -> Self {
        SlotCursor { next_free: 0, limit }
    }

    fn take_one(&mut self) -> bool {
        if self.next_free >= self.limit {
            return false;
        }
        self.next_free += 1;
        true
    }

    /// Take two consecutive slots starting at an even index; an odd slot
    /// before the pair is lost for good.
    fn take_even_pair(&mut self) -> bool {
        if self.next_free % 2 == 1 {
            self.next_free += 1;
        }
        if self.next_free + 2 > self.limit {
            return false;
        }
        self.next_free += 2;
        true
    }
}

/// Count the register-resident leading arguments under a single shared
/// register file of `gp_register_count` slots.
///
/// Kinds for which `needs_register_pair` holds take an even-aligned pair of
/// slots and count as one argument.
pub fn count_reg_args<F>(kinds: &[ScalarKind], gp_register_count: usize, needs_register_pair: F) -> usize
where
    F: Fn(ScalarKind) -> bool,
{
    let mut cursor = SlotCursor::new(gp_register_count);
    let mut reg_args = 0;
    for &kind in kinds {
        let placed = if needs_register_pair(kind) {
            cursor.take_even_pair()
        } else {
            cursor.take_one()
        };
        if !placed {
            break;
        }
        reg_args += 1;
    }
    reg_args
}

/// Where floating-point arguments are passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatRegisterFile {
    /// Floats share the general-purpose slots (soft-float conventions)
    Shared,
    /// Floats draw from a separate file with `slots` registers
    Split {
        /// Number of float argument registers
        slots: usize,
    },
}

/// Which kinds need an even-aligned register pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PairPolicy {
    /// Every argument takes one slot
    None,
    /// Double-width kinds (`Float` in a shared file, `LongLong`) take an
    /// even-aligned pair
    WideEvenAligned,
}

/// A target's argument register budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterBudget {
    /// General-purpose argument registers
    pub gp_slots: usize,
    /// Pairing rule for double-width kinds
    pub pair_policy: PairPolicy,
    /// Float register file layout
    pub float_file: FloatRegisterFile,
}

impl RegisterBudget {
    /// 32-bit ARM soft-float EABI: r0-r3, doubles and long longs in even pairs
    pub const ARM_SOFTFP: RegisterBudget = RegisterBudget {
        gp_slots: 4,
        pair_policy: PairPolicy::WideEvenAligned,
        float_file: FloatRegisterFile::Shared,
    };

    /// System V AMD64: six integer registers, eight xmm registers
    pub const SYSV_X86_64: RegisterBudget = RegisterBudget {
        gp_slots: 6,
        pair_policy: PairPolicy::None,
        float_file: FloatRegisterFile::Split { slots: 8 },
    };

    /// AAPCS64: x0-x7 and v0-v7
    pub const AAPCS64: RegisterBudget = RegisterBudget {
        gp_slots: 8,
        pair_policy: PairPolicy::None,
        float_file: FloatRegisterFile::Split { slots: 8 },
    };

    /// Budget of the default convention on `arch`
    pub fn for_target(arch: TargetArch) -> Self {
        match arch {
            TargetArch::X86_64 => Self::SYSV_X86_64,
            TargetArch::AArch64 => Self::AAPCS64,
            TargetArch::Arm32 => Self::ARM_SOFTFP,
        }
    }

    /// Whether `kind` takes an even-aligned pair of general-purpose slots.
    ///
    /// Single floats in a shared file take one slot, like integers.
    pub fn needs_register_pair(&self, kind: ScalarKind) -> bool {
        match self.pair_policy {
            PairPolicy::None => false,
            PairPolicy::WideEvenAligned => match kind {
                ScalarKind::LongLong => true,
                ScalarKind::Float => self.float_file == FloatRegisterFile::Shared,
                ScalarKind::Void | ScalarKind::Int | ScalarKind::SingleFloat => false,
            },
        }
    }

    /// Plan register usage for a call with the given argument kinds
    pub fn assign(&self, kinds: &[ScalarKind]) -> RegisterPlan {
        let register_resident = match self.float_file {
            FloatRegisterFile::Shared => {
                count_reg_args(kinds, self.gp_slots, |k| self.needs_register_pair(k))
            }
            FloatRegisterFile::Split { slots } => self.count_split(kinds, slots),
        };
        RegisterPlan { register_resident, nargs: kinds.len() }
    }

    fn count_split(&self, kinds: &[ScalarKind], float_slots: usize) -> usize {
        let mut gp = SlotCursor::new(self.gp_slots);
        let mut fp = SlotCursor::new(float_slots);
        let mut reg_args = 0;
        for &kind in kinds {
            let placed = if kind.is_float() {
                fp.take_one()
            } else if self.needs_register_pair(kind) {
                gp.take_even_pair()
            } else {
                gp.take_one()
            };
            if !placed {
                break;
            }
            reg_args += 1;
        }
        reg_args
    }
}

/// Register usage of one call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterPlan {
    /// Leading arguments passed in registers
    pub register_resident: usize,
    /// Total argument count
    pub nargs: usize,
}

impl RegisterPlan {
    /// Trailing arguments passed on the stack
    pub fn stack_resident(&self) -> usize {
        self.nargs - self.register_resident
    }

    /// Whether argument `index` is passed in a register
    pub fn is_register_resident(&self, index: usize) -> bool {
        index < self.register_resident
    }
}
