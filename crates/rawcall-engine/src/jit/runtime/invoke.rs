//! Native invocation through an exchange buffer
//!
//! An invoker receives the call descriptor, the target address and the
//! exchange buffer. It must leave the result (if any) in the result slot
//! before returning.

use std::ffi::c_void;

use crate::ffi::descr::CallDescriptor;
use crate::jit::backend::traits::CodegenError;

use super::exchange::{ExchangeLayout, ExchangeView};

/// Address of native code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodePtr(*const c_void);

// Safety: a code address is plain data; calling through it is what is unsafe.
unsafe impl Send for CodePtr {}
unsafe impl Sync for CodePtr {}

impl CodePtr {
    /// Wrap a code address
    pub fn new(ptr: *const c_void) -> Self {
        CodePtr(ptr)
    }

    /// Raw address
    pub fn as_ptr(&self) -> *const c_void {
        self.0
    }

    /// Whether the address is null
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

/// Something that can perform a native call through an exchange buffer
pub trait NativeInvoker: Send + Sync {
    /// Invoker name for diagnostics
    fn name(&self) -> &str;

    /// Call `func`, reading arguments from and storing the result into
    /// `exchange`.
    ///
    /// # Safety
    ///
    /// `func` must be callable the way this invoker calls it, with the
    /// signature `descr` describes. `exchange` must be a live buffer laid out
    /// by `layout` with every argument slot written.
    unsafe fn invoke(
        &self,
        descr: &CallDescriptor,
        func: CodePtr,
        exchange: *mut u8,
        layout: ExchangeLayout,
    ) -> Result<(), CodegenError>;
}

// ============================================================================
// Raw-call routines
// ============================================================================

/// Everything a raw-call routine receives
#[repr(C)]
#[derive(Debug)]
pub struct RawCall {
    /// Descriptor of the call
    pub descr: *const CallDescriptor,
    /// Exchange buffer base
    pub exchange: *mut u8,
    /// Slot stride
    pub stride: usize,
}

impl RawCall {
    /// Typed view of the exchange buffer.
    ///
    /// # Safety
    ///
    /// Only valid inside the routine this `RawCall` was passed to.
    pub unsafe fn view(&self) -> ExchangeView<'_> {
        ExchangeView::from_raw(&*self.descr, self.exchange, self.stride)
    }
}

/// A C-ABI routine that reads its arguments from and writes its result into
/// the exchange buffer itself
pub type RawCallFn = unsafe extern "C" fn(call: *const RawCall);

/// Invoker for targets that are [`RawCallFn`] routines.
///
/// No code is generated; the routine does its own marshaling.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCallInvoker;

impl NativeInvoker for RawCallInvoker {
    fn name(&self) -> &str {
        "raw-call"
    }

    unsafe fn invoke(
        &self,
        descr: &CallDescriptor,
        func: CodePtr,
        exchange: *mut u8,
        layout: ExchangeLayout,
    ) -> Result<(), CodegenError> {
        if func.is_null() {
            return Err(CodegenError::BackendError("null raw-call routine".to_string()));
        }
        let routine: RawCallFn = std::mem::transmute::<*const c_void, RawCallFn>(func.as_ptr());
        let call = RawCall { descr, exchange, stride: layout.stride() };
        routine(&call);
        Ok(())
    }
}
