//! Dynamic FFI signatures and call descriptors
//!
//! This module provides:
//! - Resolved C type descriptions and signatures (`FfiType`, `Signature`)
//! - Kind classification gated by CPU capabilities (`classify`)
//! - Immutable call descriptors (`build_call_descriptor`)
//! - Exchange slot access recipes for the code generator (`SlotAccessTable`)

pub mod access;
pub mod classify;
pub mod descr;
pub mod types;

pub use access::{RegisterClass, SlotAccess, SlotAccessTable, SlotItem};
pub use classify::{classify, classify_type, UnsupportedKind};
pub use descr::{build_call_descriptor, CallDescriptor, EffectInfo, ExtraEffect};
pub use types::{
    Abi, CpuCapabilities, FfiKind, FfiType, FfiTypeKind, ScalarKind, ScalarType, ScalarValue,
    Signature,
};
