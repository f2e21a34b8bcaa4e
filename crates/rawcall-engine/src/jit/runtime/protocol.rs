//! The native call protocol
//!
//! One call goes through these steps, all inside the caller's hold of the
//! execution lock except the native code itself:
//!
//! 1. check arity and argument kinds
//! 2. allocate the exchange buffer and write the arguments
//! 3. register a forcible frame for the caller
//! 4. release the lock, invoke, reacquire
//! 5. read the result
//! 6. release the buffer
//! 7. check whether the frame was forced
//!
//! The result is read in step 5 whether or not the frame gets forced, so a
//! deoptimized caller resumes with the value the callee actually produced.

use std::sync::Arc;

use crate::ffi::descr::CallDescriptor;
use crate::ffi::types::{ScalarType, ScalarValue};
use crate::jit::backend::traits::CodegenError;
use crate::jit::engine::ConfigError;
use crate::rawmem::{AllocOptions, AllocationTracker};

use super::exchange::{is_valid_stride, ExchangeBuffer, ExchangeLayout, EXCHANGE_STRIDE};
use super::frame::FrameScope;
use super::invoke::{CodePtr, NativeInvoker};
use super::lock::ExecutionGuard;

/// Error raised by the call protocol
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// Wrong number of arguments
    #[error("expected {expected} arguments, got {found}")]
    ArityMismatch {
        /// Descriptor arity
        expected: usize,
        /// Supplied arity
        found: usize,
    },
    /// An argument value does not fit its declared kind
    #[error("argument {index}: expected {expected}, got {found}")]
    ArgumentMismatch {
        /// Argument position
        index: usize,
        /// Declared type
        expected: ScalarType,
        /// Supplied value
        found: ScalarValue,
    },
    /// A result value does not fit the declared result kind
    #[error("result: expected {expected}, got {found}")]
    ResultMismatch {
        /// Declared type
        expected: ScalarType,
        /// Supplied value
        found: ScalarValue,
    },
    /// The invoker could not perform the call
    #[error("invocation failed: {0}")]
    Invoke(#[from] CodegenError),
}

/// Values handed to the recovery path after a forced frame
#[derive(Debug, Clone, PartialEq)]
pub struct DeoptState {
    /// Live values saved by the guard; the call's result (`None` for void)
    /// is always the last entry
    pub fail_args: Vec<Option<ScalarValue>>,
}

impl DeoptState {
    fn new(live: &[ScalarValue], result: Option<ScalarValue>) -> Self {
        let mut fail_args = Vec::with_capacity(live.len() + 1);
        fail_args.extend(live.iter().copied().map(Some));
        fail_args.push(result);
        DeoptState { fail_args }
    }

    /// The call's result
    pub fn result(&self) -> Option<ScalarValue> {
        self.fail_args.last().copied().flatten()
    }

    /// Live values saved alongside the result
    pub fn live(&self) -> &[Option<ScalarValue>] {
        &self.fail_args[..self.fail_args.len().saturating_sub(1)]
    }
}

/// How a call ended
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The frame stayed intact; continue in optimized code
    Completed(Option<ScalarValue>),
    /// The frame was forced during the call
    Deoptimized(DeoptState),
}

impl CallOutcome {
    /// The call's result on either path
    pub fn result(&self) -> Option<ScalarValue> {
        match self {
            CallOutcome::Completed(result) => *result,
            CallOutcome::Deoptimized(state) => state.result(),
        }
    }

    /// Whether the guard failed
    pub fn is_deoptimized(&self) -> bool {
        matches!(self, CallOutcome::Deoptimized(_))
    }
}

/// Rebuilds interpreter state after a forced frame and resumes execution
pub trait RecoveryPath {
    /// Resume from `state`, producing the value the call site yields
    fn resume(&mut self, state: DeoptState) -> Option<ScalarValue>;
}

impl<F> RecoveryPath for F
where
    F: FnMut(DeoptState) -> Option<ScalarValue>,
{
    fn resume(&mut self, state: DeoptState) -> Option<ScalarValue> {
        self(state)
    }
}

/// Performs native calls through exchange buffers
pub struct CallProtocol {
    invoker: Arc<dyn NativeInvoker>,
    stride: usize,
    zero_buffers: bool,
    tracker: Option<AllocationTracker>,
}

impl CallProtocol {
    /// Protocol with the default stride and zeroed buffers
    pub fn new(invoker: Arc<dyn NativeInvoker>) -> Self {
        CallProtocol { invoker, stride: EXCHANGE_STRIDE, zero_buffers: true, tracker: None }
    }

    /// Use `stride` for exchange slots.
    ///
    /// Fails unless `stride` satisfies
    /// [`is_valid_stride`](super::exchange::is_valid_stride).
    pub fn with_stride(mut self, stride: usize) -> Result<Self, ConfigError> {
        if !is_valid_stride(stride) {
            return Err(ConfigError::InvalidStride { stride });
        }
        self.stride = stride;
        Ok(self)
    }

    /// Whether exchange buffers start zeroed
    pub fn with_zeroed_buffers(mut self, zeroed: bool) -> Self {
        self.zero_buffers = zeroed;
        self
    }

    /// Account exchange buffers against `tracker`
    pub fn with_tracker(mut self, tracker: AllocationTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// The invoker
    pub fn invoker(&self) -> &dyn NativeInvoker {
        &*self.invoker
    }

    /// Exchange slot stride
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Check `args` against `descr` without doing anything
    pub fn validate(descr: &CallDescriptor, args: &[ScalarValue]) -> Result<(), CallError> {
        if args.len() != descr.nargs() {
            return Err(CallError::ArityMismatch { expected: descr.nargs(), found: args.len() });
        }
        for (index, (ty, value)) in descr.arg_types().iter().zip(args).enumerate() {
            if !ty.accepts(value) {
                return Err(CallError::ArgumentMismatch { index, expected: *ty, found: *value });
            }
        }
        Ok(())
    }

    /// Call `func` with `args`.
    ///
    /// `live` are the caller's values a recovery path would need; they are
    /// only copied out when the frame gets forced.
    ///
    /// # Safety
    ///
    /// `func` must be callable through this protocol's invoker with the
    /// signature `descr` describes.
    pub unsafe fn call(
        &self,
        guard: &mut ExecutionGuard<'_>,
        descr: &CallDescriptor,
        func: CodePtr,
        args: &[ScalarValue],
        live: &[ScalarValue],
    ) -> Result<CallOutcome, CallError> {
        Self::validate(descr, args)?;

        let layout = ExchangeLayout::with_checked_stride(descr.nargs(), self.stride);
        let opts = AllocOptions { tracker: self.tracker.clone() };
        let mut buffer = ExchangeBuffer::alloc(layout, self.zero_buffers, opts);
        for (index, (ty, value)) in descr.arg_types().iter().zip(args).enumerate() {
            buffer.write_arg(index, ty, *value)?;
        }

        let scope = FrameScope::enter();
        let exchange = buffer.as_mut_ptr();
        tracing::trace!(descr = %descr, invoker = self.invoker.name(), "native call");
        guard.release_during(|| self.invoker.invoke(descr, func, exchange, layout))?;

        let result = buffer.read_result(&descr.result_type());
        buffer.free();

        if scope.frame().is_forced() {
            tracing::debug!(descr = %descr, ?result, "frame forced during native call");
            return Ok(CallOutcome::Deoptimized(DeoptState::new(live, result)));
        }
        Ok(CallOutcome::Completed(result))
    }

    /// Call `func`, handing control to `recovery` if the frame gets forced.
    ///
    /// Returns the value the call site yields on whichever path ran.
    ///
    /// # Safety
    ///
    /// Same as [`CallProtocol::call`].
    pub unsafe fn call_may_force(
        &self,
        guard: &mut ExecutionGuard<'_>,
        descr: &CallDescriptor,
        func: CodePtr,
        args: &[ScalarValue],
        live: &[ScalarValue],
        recovery: &mut dyn RecoveryPath,
    ) -> Result<Option<ScalarValue>, CallError> {
        match self.call(guard, descr, func, args, live)? {
            CallOutcome::Completed(result) => Ok(result),
            CallOutcome::Deoptimized(state) => Ok(recovery.resume(state)),
        }
    }
}

impl std::fmt::Debug for CallProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallProtocol")
            .field("invoker", &self.invoker.name())
            .field("stride", &self.stride)
            .field("zero_buffers", &self.zero_buffers)
            .field("tracked", &self.tracker.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::{build_call_descriptor, Abi, CpuCapabilities, EffectInfo, FfiType, Signature};
    use crate::jit::runtime::exchange::ExchangeView;
    use crate::jit::runtime::frame::{force_current_frame, frame_depth};
    use crate::jit::runtime::lock::ExecutionLock;

    /// Runs a Rust closure as the "native" callee
    struct ClosureInvoker<F>(F);

    impl<F> NativeInvoker for ClosureInvoker<F>
    where
        F: Fn(&mut ExchangeView<'_>) + Send + Sync,
    {
        fn name(&self) -> &str {
            "closure"
        }

        unsafe fn invoke(
            &self,
            descr: &CallDescriptor,
            _func: CodePtr,
            exchange: *mut u8,
            layout: ExchangeLayout,
        ) -> Result<(), CodegenError> {
            let mut view = ExchangeView::from_raw(descr, exchange, layout.stride());
            (self.0)(&mut view);
            Ok(())
        }
    }

    fn descr(args: Vec<FfiType>, result: FfiType) -> CallDescriptor {
        let sig = Signature::new(args, result, Abi::Default);
        build_call_descriptor(&CpuCapabilities::host(), &sig, EffectInfo::MOST_GENERAL).unwrap()
    }

    fn null() -> CodePtr {
        CodePtr::new(std::ptr::null())
    }

    #[test]
    fn test_validation_happens_before_allocation() {
        let tracker = AllocationTracker::new();
        let invoker = Arc::new(ClosureInvoker(|_: &mut ExchangeView<'_>| {}));
        let protocol = CallProtocol::new(invoker).with_tracker(tracker.clone());
        let lock = ExecutionLock::new();
        let mut guard = lock.acquire();
        let d = descr(vec![FfiType::SINT32], FfiType::VOID);

        let err = unsafe { protocol.call(&mut guard, &d, null(), &[], &[]) }.unwrap_err();
        assert_eq!(err, CallError::ArityMismatch { expected: 1, found: 0 });
        let err = unsafe { protocol.call(&mut guard, &d, null(), &[ScalarValue::Float(1.0)], &[]) }
            .unwrap_err();
        assert!(matches!(err, CallError::ArgumentMismatch { index: 0, .. }));
        assert_eq!(tracker.stats().total, 0);
    }

    #[test]
    fn test_completed_call() {
        let tracker = AllocationTracker::new();
        let invoker = Arc::new(ClosureInvoker(|view: &mut ExchangeView<'_>| {
            let a = view.arg(0).and_then(|v| v.as_int()).unwrap();
            let b = view.arg(1).and_then(|v| v.as_float()).unwrap();
            view.set_result(ScalarValue::Float(a as f64 * b)).unwrap();
        }));
        let protocol = CallProtocol::new(invoker).with_tracker(tracker.clone());
        let lock = ExecutionLock::new();
        let mut guard = lock.acquire();
        let d = descr(vec![FfiType::SINT32, FfiType::DOUBLE], FfiType::DOUBLE);

        let outcome = unsafe {
            protocol.call(&mut guard, &d, null(), &[ScalarValue::Int(3), ScalarValue::Float(1.5)], &[])
        }
        .unwrap();
        assert_eq!(outcome, CallOutcome::Completed(Some(ScalarValue::Float(4.5))));
        assert!(tracker.is_balanced());
        assert_eq!(tracker.stats().total, 1);
        assert_eq!(frame_depth(), 0);
    }

    #[test]
    fn test_lock_released_during_invoke() {
        let lock = Arc::new(ExecutionLock::new());
        let observed = lock.clone();
        let invoker = Arc::new(ClosureInvoker(move |view: &mut ExchangeView<'_>| {
            let locked = observed.is_locked() as i64;
            view.set_result(ScalarValue::Int(locked)).unwrap();
        }));
        let protocol = CallProtocol::new(invoker);
        let mut guard = lock.acquire();
        let d = descr(vec![], FfiType::SINT32);

        let outcome = unsafe { protocol.call(&mut guard, &d, null(), &[], &[]) }.unwrap();
        assert_eq!(outcome.result(), Some(ScalarValue::Int(0)));
        assert!(lock.is_locked());
    }

    #[test]
    fn test_forced_frame_carries_result() {
        let tracker = AllocationTracker::new();
        let invoker = Arc::new(ClosureInvoker(|view: &mut ExchangeView<'_>| {
            view.set_result(ScalarValue::Int(-9)).unwrap();
            assert!(force_current_frame());
        }));
        let protocol = CallProtocol::new(invoker).with_tracker(tracker.clone());
        let lock = ExecutionLock::new();
        let mut guard = lock.acquire();
        let d = descr(vec![], FfiType::SINT8);

        let outcome = unsafe { protocol.call(&mut guard, &d, null(), &[], &[ScalarValue::Int(1)]) }
            .unwrap();
        match outcome {
            CallOutcome::Deoptimized(state) => {
                assert_eq!(state.result(), Some(ScalarValue::Int(-9)));
                assert_eq!(state.live(), &[Some(ScalarValue::Int(1))]);
                assert_eq!(state.fail_args.last(), Some(&Some(ScalarValue::Int(-9))));
            }
            other => panic!("expected deoptimization, got {:?}", other),
        }
        assert!(tracker.is_balanced());
        assert_eq!(frame_depth(), 0);
    }

    #[test]
    fn test_forced_void_call_carries_sentinel() {
        let invoker = Arc::new(ClosureInvoker(|_: &mut ExchangeView<'_>| {
            force_current_frame();
        }));
        let protocol = CallProtocol::new(invoker);
        let lock = ExecutionLock::new();
        let mut guard = lock.acquire();
        let d = descr(vec![], FfiType::VOID);

        let mut resumed = 0;
        let result = unsafe {
            protocol.call_may_force(&mut guard, &d, null(), &[], &[], &mut |state: DeoptState| {
                resumed += 1;
                assert_eq!(state.fail_args, vec![None]);
                state.result()
            })
        }
        .unwrap();
        assert_eq!(result, None);
        assert_eq!(resumed, 1);
    }

    #[test]
    fn test_invoke_error_still_releases_buffer() {
        struct Failing;
        impl NativeInvoker for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            unsafe fn invoke(
                &self,
                _: &CallDescriptor,
                _: CodePtr,
                _: *mut u8,
                _: ExchangeLayout,
            ) -> Result<(), CodegenError> {
                Err(CodegenError::BackendError("boom".to_string()))
            }
        }

        let tracker = AllocationTracker::new();
        let protocol = CallProtocol::new(Arc::new(Failing)).with_tracker(tracker.clone());
        let lock = ExecutionLock::new();
        let mut guard = lock.acquire();
        let d = descr(vec![FfiType::SINT64], FfiType::SINT64);

        let err = unsafe { protocol.call(&mut guard, &d, null(), &[ScalarValue::Int(1)], &[]) }
            .unwrap_err();
        assert!(matches!(err, CallError::Invoke(_)));
        assert!(tracker.is_balanced());
        assert_eq!(frame_depth(), 0);
    }

    #[test]
    fn test_wide_stride() {
        let invoker = Arc::new(ClosureInvoker(|view: &mut ExchangeView<'_>| {
            let v = view.arg(1).and_then(|v| v.as_int()).unwrap();
            view.set_result(ScalarValue::Int(v + 1)).unwrap();
        }));
        let protocol = CallProtocol::new(invoker).with_stride(64).unwrap().with_zeroed_buffers(false);
        let lock = ExecutionLock::new();
        let mut guard = lock.acquire();
        let d = descr(vec![FfiType::SINT8, FfiType::UINT32], FfiType::UINT32);
        let args = [ScalarValue::Int(1), ScalarValue::Int(41)];
        let outcome = unsafe { protocol.call(&mut guard, &d, null(), &args, &[]) }.unwrap();
        assert_eq!(outcome.result(), Some(ScalarValue::Int(42)));
    }

    #[test]
    fn test_overlapping_strides_rejected() {
        let invoker = Arc::new(ClosureInvoker(|_: &mut ExchangeView<'_>| {}));
        for stride in [0, 4, 24] {
            let err = CallProtocol::new(invoker.clone()).with_stride(stride).unwrap_err();
            assert_eq!(err, ConfigError::InvalidStride { stride });
        }
    }

    #[test]
    fn test_unwritten_result_reads_zero() {
        let invoker = Arc::new(ClosureInvoker(|_: &mut ExchangeView<'_>| {}));
        let protocol = CallProtocol::new(invoker).with_zeroed_buffers(false);
        let lock = ExecutionLock::new();
        let mut guard = lock.acquire();
        let d = descr(vec![FfiType::DOUBLE, FfiType::DOUBLE], FfiType::SINT32);
        let args = [ScalarValue::Float(1.5), ScalarValue::Float(2.5)];
        let outcome = unsafe { protocol.call(&mut guard, &d, null(), &args, &[]) }.unwrap();
        assert_eq!(outcome, CallOutcome::Completed(Some(ScalarValue::Int(0))));
    }
}
