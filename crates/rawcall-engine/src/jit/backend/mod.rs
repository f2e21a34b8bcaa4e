//! Target description, register assignment and generated call stubs

pub mod regs;
pub mod traits;
#[cfg(feature = "jit")]
pub mod cranelift;

pub use regs::{count_reg_args, FloatRegisterFile, PairPolicy, RegisterBudget, RegisterPlan};
pub use traits::{CodegenError, TargetArch, TargetInfo};
#[cfg(feature = "jit")]
pub use self::cranelift::{ExchangeTrampolines, TrampolineFn};
