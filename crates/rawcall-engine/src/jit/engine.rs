//! Top-level call bridge: owns configuration, descriptor cache, execution
//! lock, allocation tracking and the call protocol.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ffi::descr::EffectInfo;
use crate::ffi::types::{CpuCapabilities, ScalarValue, Signature};
use crate::jit::backend::regs::RegisterBudget;
use crate::jit::backend::traits::{CodegenError, TargetArch, TargetInfo};
use crate::jit::runtime::descr_cache::{CachedCall, DescriptorCache};
use crate::jit::runtime::exchange::{is_valid_stride, EXCHANGE_STRIDE};
use crate::jit::runtime::invoke::{CodePtr, NativeInvoker, RawCallInvoker};
use crate::jit::runtime::lock::ExecutionLock;
use crate::jit::runtime::protocol::{CallError, CallOutcome, CallProtocol, RecoveryPath};
use crate::rawmem::AllocationTracker;

/// How native functions are invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvokerKind {
    /// Cranelift exchange trampolines (feature `jit`)
    Trampoline,
    /// Targets are raw-call routines doing their own marshaling
    RawCall,
}

impl Default for InvokerKind {
    fn default() -> Self {
        if cfg!(feature = "jit") {
            InvokerKind::Trampoline
        } else {
            InvokerKind::RawCall
        }
    }
}

impl std::fmt::Display for InvokerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvokerKind::Trampoline => f.write_str("trampoline"),
            InvokerKind::RawCall => f.write_str("raw-call"),
        }
    }
}

/// Configuration for the call bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Exchange slot stride in bytes (default: 16)
    pub exchange_stride: usize,
    /// Zero exchange buffers on allocation (default: true)
    pub zero_exchange_buffers: bool,
    /// Account exchange buffers in an allocation tracker (default: false)
    pub track_allocations: bool,
    /// Target architecture (default: host)
    pub target: TargetArch,
    /// Invocation mechanism (default: trampolines with `jit`, raw calls otherwise)
    pub invoker: InvokerKind,
    /// Override 64-bit float support
    pub supports_floats: Option<bool>,
    /// Override narrow-word 64-bit integer support
    pub supports_longlong: Option<bool>,
    /// Override 32-bit float support
    pub supports_singlefloats: Option<bool>,
    /// Override the target's register budget
    pub registers: Option<RegisterBudget>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            exchange_stride: EXCHANGE_STRIDE,
            zero_exchange_buffers: true,
            track_allocations: false,
            target: TargetArch::host(),
            invoker: InvokerKind::default(),
            supports_floats: None,
            supports_longlong: None,
            supports_singlefloats: None,
            registers: None,
        }
    }
}

impl BridgeConfig {
    /// Check the configuration for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_stride(self.exchange_stride) {
            return Err(ConfigError::InvalidStride { stride: self.exchange_stride });
        }
        if self.invoker == InvokerKind::Trampoline {
            if !cfg!(feature = "jit") {
                return Err(ConfigError::InvokerUnavailable(self.invoker));
            }
            let host = TargetArch::host();
            if self.target != host {
                return Err(ConfigError::ForeignTarget { target: self.target, host });
            }
        }
        Ok(())
    }

    /// Capabilities descriptors are built against
    pub fn capabilities(&self) -> CpuCapabilities {
        CpuCapabilities {
            supports_floats: self.supports_floats.unwrap_or(true),
            supports_longlong: self.supports_longlong.unwrap_or(true),
            supports_singlefloats: self.supports_singlefloats.unwrap_or(true),
            word_size: self.target.word_size(),
        }
    }

    /// Target description with any register override applied
    pub fn target_info(&self) -> TargetInfo {
        let mut info = TargetInfo::for_arch(self.target);
        if let Some(registers) = self.registers {
            info.registers = registers;
        }
        info
    }
}

/// Invalid bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Stride is not a power of two of at least 16 bytes
    #[error("exchange stride {stride} must be a power of two of at least 16")]
    InvalidStride {
        /// Rejected stride
        stride: usize,
    },
    /// Trampolines only run on the host
    #[error("trampolines can only target the host ({host}), not {target}")]
    ForeignTarget {
        /// Configured target
        target: TargetArch,
        /// Host architecture
        host: TargetArch,
    },
    /// The invoker was compiled out
    #[error("invoker '{0}' is not available in this build")]
    InvokerUnavailable(InvokerKind),
}

/// Error while creating a call bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Backend initialization failed
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

/// Entry point for native calls from compiled code
pub struct CallBridge {
    config: BridgeConfig,
    target: TargetInfo,
    cache: DescriptorCache,
    lock: ExecutionLock,
    tracker: Option<AllocationTracker>,
    protocol: CallProtocol,
}

impl CallBridge {
    /// Create a bridge with default configuration
    pub fn new() -> Result<Self, BridgeError> {
        Self::with_config(BridgeConfig::default())
    }

    /// Create a bridge with custom configuration
    pub fn with_config(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        let invoker: Arc<dyn NativeInvoker> = match config.invoker {
            InvokerKind::RawCall => Arc::new(RawCallInvoker),
            InvokerKind::Trampoline => host_trampolines()?,
        };
        Ok(Self::with_invoker(config, invoker)?)
    }

    /// Create a bridge that calls through `invoker`, ignoring the configured
    /// invoker kind
    pub fn with_invoker(config: BridgeConfig, invoker: Arc<dyn NativeInvoker>) -> Result<Self, ConfigError> {
        let target = config.target_info();
        let cache = DescriptorCache::new(config.capabilities(), target.registers);
        let tracker = config.track_allocations.then(AllocationTracker::new);

        let mut protocol = CallProtocol::new(invoker)
            .with_stride(config.exchange_stride)?
            .with_zeroed_buffers(config.zero_exchange_buffers);
        if let Some(tracker) = &tracker {
            protocol = protocol.with_tracker(tracker.clone());
        }

        tracing::debug!(
            target_arch = %config.target,
            invoker = protocol.invoker().name(),
            stride = config.exchange_stride,
            "call bridge ready"
        );

        Ok(CallBridge { config, target, cache, lock: ExecutionLock::new(), tracker, protocol })
    }

    /// Descriptor and register plan for `sig`, or `None` when calls with
    /// this signature must take the non-accelerated path
    pub fn descriptor_for(&self, sig: &Signature, extra: EffectInfo) -> Option<CachedCall> {
        self.cache.get_or_build(sig, extra)
    }

    /// Call `func` under the execution lock.
    ///
    /// A forced frame is not an error here: the result is returned either way.
    ///
    /// # Safety
    ///
    /// `func` must be callable through this bridge's invoker with the
    /// signature `call` describes.
    pub unsafe fn call(
        &self,
        call: &CachedCall,
        func: CodePtr,
        args: &[ScalarValue],
    ) -> Result<Option<ScalarValue>, CallError> {
        let mut guard = self.lock.acquire();
        let outcome = self.protocol.call(&mut guard, &call.descr, func, args, &[])?;
        if let CallOutcome::Deoptimized(_) = &outcome {
            tracing::debug!(descr = %call.descr, "frame forced outside a guarded call site");
        }
        Ok(outcome.result())
    }

    /// Call `func` under the execution lock, resuming through `recovery` if
    /// the frame is forced.
    ///
    /// # Safety
    ///
    /// Same as [`CallBridge::call`].
    pub unsafe fn call_may_force(
        &self,
        call: &CachedCall,
        func: CodePtr,
        args: &[ScalarValue],
        live: &[ScalarValue],
        recovery: &mut dyn RecoveryPath,
    ) -> Result<Option<ScalarValue>, CallError> {
        let mut guard = self.lock.acquire();
        self.protocol.call_may_force(&mut guard, &call.descr, func, args, live, recovery)
    }

    /// Active configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Target description
    pub fn target(&self) -> &TargetInfo {
        &self.target
    }

    /// Capabilities descriptors are built against
    pub fn capabilities(&self) -> CpuCapabilities {
        self.cache.capabilities()
    }

    /// The descriptor cache
    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }

    /// The managed-execution lock
    pub fn lock(&self) -> &ExecutionLock {
        &self.lock
    }

    /// The call protocol, for callers that manage the lock themselves
    pub fn protocol(&self) -> &CallProtocol {
        &self.protocol
    }

    /// Allocation tracker, when `track_allocations` is set
    pub fn tracker(&self) -> Option<&AllocationTracker> {
        self.tracker.as_ref()
    }
}

impl std::fmt::Debug for CallBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallBridge")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("protocol", &self.protocol)
            .finish()
    }
}

#[cfg(feature = "jit")]
fn host_trampolines() -> Result<Arc<dyn NativeInvoker>, BridgeError> {
    let trampolines = crate::jit::backend::cranelift::ExchangeTrampolines::host()?;
    Ok(Arc::new(trampolines))
}

#[cfg(not(feature = "jit"))]
fn host_trampolines() -> Result<Arc<dyn NativeInvoker>, BridgeError> {
    Err(ConfigError::InvokerUnavailable(InvokerKind::Trampoline).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::{Abi, FfiType};
    use crate::jit::runtime::invoke::{RawCall, RawCallFn};

    fn raw_call_config() -> BridgeConfig {
        BridgeConfig { invoker: InvokerKind::RawCall, track_allocations: true, ..Default::default() }
    }

    unsafe extern "C" fn negate(call: *const RawCall) {
        let mut view = (*call).view();
        let v = view.arg(0).and_then(|v| v.as_int()).unwrap_or(0);
        view.set_result(ScalarValue::Int(-v)).unwrap();
    }

    #[test]
    fn test_bridge_creation() {
        let bridge = CallBridge::new().unwrap();
        assert_eq!(bridge.config().exchange_stride, EXCHANGE_STRIDE);
        assert_eq!(bridge.target().arch, TargetArch::host());
        assert!(bridge.tracker().is_none());
        assert!(!bridge.lock().is_locked());
    }

    #[test]
    fn test_invalid_strides_rejected() {
        for stride in [0, 8, 24, 48] {
            let config = BridgeConfig { exchange_stride: stride, ..raw_call_config() };
            assert_eq!(config.validate(), Err(ConfigError::InvalidStride { stride }));
            assert!(CallBridge::with_config(config).is_err());
        }
    }

    #[test]
    fn test_trampolines_need_host_target() {
        let foreign = if TargetArch::host() == TargetArch::Arm32 {
            TargetArch::X86_64
        } else {
            TargetArch::Arm32
        };
        let config = BridgeConfig { target: foreign, invoker: InvokerKind::Trampoline, ..Default::default() };
        assert!(config.validate().is_err());

        // Raw calls do not care, so foreign targets can still be planned for
        let config = BridgeConfig { target: foreign, ..raw_call_config() };
        let bridge = CallBridge::with_config(config).unwrap();
        assert_eq!(bridge.capabilities().word_size, foreign.word_size());
    }

    #[test]
    fn test_capability_overrides() {
        let config = BridgeConfig { supports_floats: Some(false), ..raw_call_config() };
        let bridge = CallBridge::with_config(config).unwrap();
        let sig = Signature::new(vec![FfiType::DOUBLE], FfiType::SINT32, Abi::Default);
        assert!(bridge.descriptor_for(&sig, EffectInfo::MOST_GENERAL).is_none());
        let sig = Signature::new(vec![FfiType::FLOAT], FfiType::SINT32, Abi::Default);
        assert!(bridge.descriptor_for(&sig, EffectInfo::MOST_GENERAL).is_some());
    }

    #[test]
    fn test_register_override() {
        let config = BridgeConfig { registers: Some(RegisterBudget::ARM_SOFTFP), ..raw_call_config() };
        let bridge = CallBridge::with_config(config).unwrap();
        let sig = Signature::new(vec![FfiType::SINT32; 6], FfiType::VOID, Abi::Default);
        let call = bridge.descriptor_for(&sig, EffectInfo::MOST_GENERAL).unwrap();
        assert_eq!(call.plan.register_resident, 4);
    }

    #[test]
    fn test_raw_call_through_bridge() {
        let bridge = CallBridge::with_config(raw_call_config()).unwrap();
        let sig = Signature::new(vec![FfiType::SINT16], FfiType::SINT16, Abi::Default);
        let call = bridge.descriptor_for(&sig, EffectInfo::MOST_GENERAL).unwrap();
        let func = CodePtr::new(negate as RawCallFn as *const std::ffi::c_void);

        let result = unsafe { bridge.call(&call, func, &[ScalarValue::Int(1234)]) }.unwrap();
        assert_eq!(result, Some(ScalarValue::Int(-1234)));
        let tracker = bridge.tracker().unwrap();
        assert!(tracker.is_balanced());
        assert_eq!(tracker.stats().total, 1);
        assert!(!bridge.lock().is_locked());
    }

    #[test]
    fn test_config_target_names_match_command_line() {
        for (name, arch) in [("x86_64", TargetArch::X86_64), ("aarch64", TargetArch::AArch64), ("arm", TargetArch::Arm32)] {
            let config: BridgeConfig = toml::from_str(&format!("target = \"{}\"", name)).unwrap();
            assert_eq!(config.target, arch);
            assert_eq!(name.parse::<TargetArch>().unwrap(), arch);
            assert_eq!(arch.to_string(), name);
        }
        for alias in ["amd64", "arm64", "armv7"] {
            let config: BridgeConfig = toml::from_str(&format!("target = \"{}\"", alias)).unwrap();
            assert_eq!(config.target, alias.parse::<TargetArch>().unwrap());
        }
        let text = toml::to_string(&BridgeConfig { target: TargetArch::Arm32, ..Default::default() }).unwrap();
        assert!(text.contains("target = \"arm\""));
    }
}
