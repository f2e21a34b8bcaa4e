//! Cranelift exchange trampolines
//!
//! Compiles one small stub per (descriptor, stride) pair that moves arguments
//! from the exchange buffer into the native calling convention and the result
//! back. Stubs are cached and never freed while the trampolines live.

pub mod trampoline;

use std::ffi::c_void;

use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_jit::{JITBuilder, JITModule};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use target_lexicon::Architecture;

use crate::ffi::access::SlotAccessTable;
use crate::ffi::descr::CallDescriptor;
use crate::ffi::types::CpuCapabilities;
use crate::jit::backend::traits::*;
use crate::jit::runtime::exchange::ExchangeLayout;
use crate::jit::runtime::invoke::{CodePtr, NativeInvoker};

/// Compiled exchange stub: `(func, exchange) -> ()`
pub type TrampolineFn = unsafe extern "C" fn(func: *const c_void, exchange: *mut u8);

struct StubModule {
    module: JITModule,
    stubs: FxHashMap<(CallDescriptor, usize), TrampolineFn>,
}

// Safety: the JIT module is only touched under the trampolines' mutex.
unsafe impl Send for StubModule {}

/// Codegen settings for every exchange stub
const STUB_FLAGS: [(&str, &str); 3] =
    [("opt_level", "speed"), ("is_pic", "false"), ("enable_verifier", "true")];

fn stub_flags() -> Result<settings::Flags, CodegenError> {
    let mut builder = settings::builder();
    for (name, value) in STUB_FLAGS {
        builder.set(name, value).map_err(|e| {
            CodegenError::BackendError(format!("stub flag {}={}: {}", name, value, e))
        })?;
    }
    Ok(settings::Flags::new(builder))
}

/// Cache of Cranelift-compiled exchange stubs
pub struct ExchangeTrampolines {
    isa: OwnedTargetIsa,
    access: SlotAccessTable,
    inner: Mutex<StubModule>,
}

impl ExchangeTrampolines {
    /// Create trampolines targeting the host machine
    pub fn host() -> Result<Self, CodegenError> {
        let isa = cranelift_native::builder()
            .map_err(|e| CodegenError::BackendError(format!("no native ISA: {}", e)))?
            .finish(stub_flags()?)
            .map_err(|e| CodegenError::BackendError(format!("native ISA rejected stub flags: {}", e)))?;
        Ok(Self::with_isa(isa))
    }

    /// Create trampolines for a specific ISA
    pub fn with_isa(isa: OwnedTargetIsa) -> Self {
        let cpu = CpuCapabilities { word_size: isa.pointer_bytes() as usize, ..CpuCapabilities::host() };
        let builder = JITBuilder::with_isa(isa.clone(), cranelift_module::default_libcall_names());
        let module = JITModule::new(builder);
        ExchangeTrampolines {
            isa,
            access: SlotAccessTable::new(&cpu),
            inner: Mutex::new(StubModule { module, stubs: FxHashMap::default() }),
        }
    }

    /// Target the stubs are compiled for
    pub fn target_info(&self) -> TargetInfo {
        let arch = match self.isa.triple().architecture {
            Architecture::X86_64 => TargetArch::X86_64,
            Architecture::Aarch64(_) => TargetArch::AArch64,
            Architecture::Arm(_) => TargetArch::Arm32,
            _ => TargetArch::X86_64, // fallback
        };
        TargetInfo {
            pointer_size: self.isa.pointer_bytes() as usize,
            ..TargetInfo::for_arch(arch)
        }
    }

    /// The stub for `descr` with slot stride `stride`, compiling it on first
    /// use
    pub fn stub_for(&self, descr: &CallDescriptor, stride: usize) -> Result<TrampolineFn, CodegenError> {
        let mut inner = self.inner.lock();
        let key = (descr.clone(), stride);
        if let Some(stub) = inner.stubs.get(&key) {
            return Ok(*stub);
        }

        let index = inner.stubs.len();
        let stub = self.compile(&mut inner.module, descr, stride, index)?;
        inner.stubs.insert(key, stub);
        Ok(stub)
    }

    #[tracing::instrument(level = "debug", skip(self, module, descr), fields(descr = %descr))]
    fn compile(
        &self,
        module: &mut JITModule,
        descr: &CallDescriptor,
        stride: usize,
        index: usize,
    ) -> Result<TrampolineFn, CodegenError> {
        let layout = ExchangeLayout::for_descriptor(descr, stride)
            .map_err(|e| CodegenError::UnsupportedSignature(e.to_string()))?;
        let name = format!("exchange_stub_{}", index);
        let func_id = trampoline::define_stub(module, &*self.isa, &self.access, descr, layout, &name)?;
        module
            .finalize_definitions()
            .map_err(|e| CodegenError::BackendError(format!("Failed to finalize stub: {}", e)))?;

        let code = module.get_finalized_function(func_id);
        tracing::debug!(?code, "compiled exchange stub");
        // Safety: the stub was just defined with the TrampolineFn signature
        Ok(unsafe { std::mem::transmute::<*const u8, TrampolineFn>(code) })
    }

    /// Number of compiled stubs
    pub fn compiled_count(&self) -> usize {
        self.inner.lock().stubs.len()
    }
}

impl NativeInvoker for ExchangeTrampolines {
    fn name(&self) -> &str {
        "cranelift"
    }

    unsafe fn invoke(
        &self,
        descr: &CallDescriptor,
        func: CodePtr,
        exchange: *mut u8,
        layout: ExchangeLayout,
    ) -> Result<(), CodegenError> {
        if func.is_null() {
            return Err(CodegenError::BackendError("null native function".to_string()));
        }
        // The lock is not held across the call: the callee may re-enter and
        // need stubs of its own.
        let stub = self.stub_for(descr, layout.stride())?;
        stub(func.as_ptr(), exchange);
        Ok(())
    }
}

impl std::fmt::Debug for ExchangeTrampolines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeTrampolines")
            .field("isa", &self.isa.triple().to_string())
            .field("compiled", &self.compiled_count())
            .finish()
    }
}
