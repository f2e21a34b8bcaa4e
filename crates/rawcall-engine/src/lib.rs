//! Rawcall Engine
//!
//! The bridge between JIT-compiled code and native functions whose signatures
//! are only known at run time:
//! - **Raw memory**: untyped, explicitly-owned buffers with aligned and
//!   alignment-tolerant scalar access (`rawmem` module)
//! - **FFI types**: dynamic C-like signatures, kind classification against the
//!   CPU's capabilities, and immutable call descriptors (`ffi` module)
//! - **JIT support**: register assignment, the exchange-buffer call protocol,
//!   deoptimization hand-off, and Cranelift exchange trampolines (`jit` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use rawcall_engine::ffi::{FfiType, Signature, Abi, EffectInfo};
//! use rawcall_engine::jit::CallBridge;
//!
//! let bridge = CallBridge::new()?;
//! let sig = Signature::new(vec![FfiType::SINT32, FfiType::DOUBLE], FfiType::DOUBLE, Abi::Default);
//! let call = bridge.descriptor_for(&sig, EffectInfo::MOST_GENERAL).expect("supported");
//! println!("{} register-resident", call.plan.register_resident);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::not_unsafe_ptr_arg_deref)]

/// Raw memory: untyped storage, alignment masks, unaligned access fallback
pub mod rawmem;

/// FFI types: signatures, classification, call descriptors
pub mod ffi;

/// JIT support: register plans, call protocol, trampolines
pub mod jit;

// ============================================================================
// Re-exports
// ============================================================================

pub use ffi::{
    build_call_descriptor, classify, Abi, CallDescriptor, CpuCapabilities, EffectInfo, FfiType,
    ScalarKind, ScalarType, ScalarValue, Signature, UnsupportedKind,
};
pub use jit::{BridgeConfig, CallBridge};
pub use rawmem::{AlignmentError, RawStorage};
