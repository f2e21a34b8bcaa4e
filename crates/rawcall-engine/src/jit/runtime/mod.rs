//! Runtime side of native calls: exchange buffers, invocation, the execution
//! lock, forcible frames and the descriptor cache

pub mod descr_cache;
pub mod exchange;
pub mod frame;
pub mod invoke;
pub mod lock;
pub mod protocol;

pub use descr_cache::{CachedCall, DescriptorCache};
pub use exchange::{is_valid_stride, ExchangeBuffer, ExchangeLayout, ExchangeView, EXCHANGE_STRIDE};
pub use frame::{current_frame, force_current_frame, frame_depth, FrameRef, FrameScope};
pub use invoke::{CodePtr, NativeInvoker, RawCall, RawCallFn, RawCallInvoker};
pub use lock::{ExecutionGuard, ExecutionLock};
pub use protocol::{CallError, CallOutcome, CallProtocol, DeoptState, RecoveryPath};
