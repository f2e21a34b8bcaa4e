//! Exchange buffer: the raw memory block arguments and results travel through
//!
//! Layout for a call with `n` arguments and stride `s`:
//!
//! ```text
//! offset 0        slot 0      reserved
//! offset s*(i+1)  slot i+1    argument i
//! offset s*(n+1)  slot n+1    result
//! size   s*(n+2)
//! ```

use std::marker::PhantomData;

use crate::ffi::descr::CallDescriptor;
use crate::ffi::types::{ScalarKind, ScalarType, ScalarValue};
use crate::rawmem::{
    read_raw_unaligned, write_raw_unaligned, AllocOptions, RawScalar, RawStorage, UnalignedPolicy,
    MAXIMUM_ALIGNMENT,
};

use super::protocol::CallError;
use crate::jit::engine::ConfigError;

/// Default slot stride in bytes
pub const EXCHANGE_STRIDE: usize = 16;

/// Whether `stride` is usable as an exchange slot stride
pub fn is_valid_stride(stride: usize) -> bool {
    stride.is_power_of_two() && stride >= EXCHANGE_STRIDE && stride % MAXIMUM_ALIGNMENT == 0
}

/// Slot offsets of an exchange buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeLayout {
    nargs: usize,
    stride: usize,
}

impl ExchangeLayout {
    /// Layout for `nargs` arguments.
    ///
    /// Fails unless `stride` satisfies [`is_valid_stride`]; a smaller stride
    /// would let neighbouring slots overlap.
    pub fn new(nargs: usize, stride: usize) -> Result<Self, ConfigError> {
        if !is_valid_stride(stride) {
            return Err(ConfigError::InvalidStride { stride });
        }
        Ok(ExchangeLayout { nargs, stride })
    }

    /// Layout for calls through `descr`
    pub fn for_descriptor(descr: &CallDescriptor, stride: usize) -> Result<Self, ConfigError> {
        Self::new(descr.nargs(), stride)
    }

    /// Layout for a stride that was validated when its owner was built.
    ///
    /// Panics on an invalid stride.
    pub(crate) fn with_checked_stride(nargs: usize, stride: usize) -> Self {
        assert!(is_valid_stride(stride), "invalid exchange stride {}", stride);
        ExchangeLayout { nargs, stride }
    }

    /// Number of argument slots
    pub fn nargs(&self) -> usize {
        self.nargs
    }

    /// Slot stride in bytes
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Offset of argument `index`
    pub fn arg_offset(&self, index: usize) -> usize {
        (index + 1) * self.stride
    }

    /// Offset of the result slot
    pub fn result_offset(&self) -> usize {
        (self.nargs + 1) * self.stride
    }

    /// Total buffer size
    pub fn size(&self) -> usize {
        (self.nargs + 2) * self.stride
    }
}

// ============================================================================
// Dynamic scalar access
// ============================================================================

/// Typed unaligned load/store over some byte region
trait SlotMemory {
    fn load<T: RawScalar>(&self, offset: usize) -> T;
    fn store<T: RawScalar>(&mut self, offset: usize, value: T);
}

impl SlotMemory for RawStorage {
    fn load<T: RawScalar>(&self, offset: usize) -> T {
        self.get_unaligned(offset)
    }

    fn store<T: RawScalar>(&mut self, offset: usize, value: T) {
        self.set_unaligned(offset, value)
    }
}

/// Bare pointer into a live exchange buffer
struct RawSlots {
    base: *mut u8,
    policy: UnalignedPolicy,
}

impl SlotMemory for RawSlots {
    fn load<T: RawScalar>(&self, offset: usize) -> T {
        // Safety: `ExchangeView::from_raw` guarantees the buffer covers every
        // slot of its layout, and callers only pass layout offsets.
        unsafe { read_raw_unaligned(self.policy, self.base, offset) }
    }

    fn store<T: RawScalar>(&mut self, offset: usize, value: T) {
        // Safety: see `load`
        unsafe { write_raw_unaligned(self.policy, self.base, offset, value) }
    }
}

/// Read a value of type `ty` at `offset`; `None` for void.
///
/// Integers are sign- or zero-extended from their declared width.
fn read_scalar<M: SlotMemory>(mem: &M, offset: usize, ty: &ScalarType) -> Option<ScalarValue> {
    let value = match ty.kind {
        ScalarKind::Void => return None,
        ScalarKind::Int | ScalarKind::LongLong => {
            let v = match (ty.size, ty.signed) {
                (1, true) => mem.load::<i8>(offset) as i64,
                (1, false) => mem.load::<u8>(offset) as i64,
                (2, true) => mem.load::<i16>(offset) as i64,
                (2, false) => mem.load::<u16>(offset) as i64,
                (4, true) => mem.load::<i32>(offset) as i64,
                (4, false) => mem.load::<u32>(offset) as i64,
                _ => mem.load::<i64>(offset),
            };
            ScalarValue::Int(v)
        }
        ScalarKind::Float => ScalarValue::Float(mem.load::<f64>(offset)),
        ScalarKind::SingleFloat => ScalarValue::SingleFloat(mem.load::<f32>(offset)),
    };
    Some(value)
}

/// Store `value` as type `ty` at `offset`, truncating integers to their
/// declared width. Returns false (and stores nothing) on a kind mismatch.
fn write_scalar<M: SlotMemory>(mem: &mut M, offset: usize, ty: &ScalarType, value: ScalarValue) -> bool {
    match (ty.kind, value) {
        (ScalarKind::Int | ScalarKind::LongLong, ScalarValue::Int(v)) => {
            match ty.size {
                1 => mem.store(offset, v as i8),
                2 => mem.store(offset, v as i16),
                4 => mem.store(offset, v as i32),
                _ => mem.store(offset, v),
            }
            true
        }
        (ScalarKind::Float, ScalarValue::Float(v)) => {
            mem.store(offset, v);
            true
        }
        (ScalarKind::SingleFloat, ScalarValue::SingleFloat(v)) => {
            mem.store(offset, v);
            true
        }
        _ => false,
    }
}

// ============================================================================
// Caller side
// ============================================================================

/// Exchange buffer owned by one in-flight call.
///
/// Released when dropped, so every exit path (including unwinding) frees it.
#[derive(Debug)]
pub struct ExchangeBuffer {
    storage: RawStorage,
    layout: ExchangeLayout,
}

impl ExchangeBuffer {
    /// Allocate a buffer for `layout`.
    ///
    /// Without `zeroed` only the result slot is cleared: argument slots start
    /// uninitialized until written, and a callee that never stores a result
    /// reads back as zero.
    pub fn alloc(layout: ExchangeLayout, zeroed: bool, opts: AllocOptions) -> Self {
        if zeroed {
            let storage = RawStorage::alloc(layout.size(), opts);
            return ExchangeBuffer { storage, layout };
        }

        // Safety: argument slots are only read through `read_arg` after the
        // protocol wrote them; the result slot is zeroed right here.
        let mut storage = unsafe { RawStorage::alloc_uninit(layout.size(), opts) };
        unsafe {
            storage
                .as_mut_ptr()
                .add(layout.result_offset())
                .write_bytes(0, layout.stride());
        }
        ExchangeBuffer { storage, layout }
    }

    /// Slot layout
    pub fn layout(&self) -> ExchangeLayout {
        self.layout
    }

    /// Base address handed to the invoker
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.storage.as_mut_ptr()
    }

    /// Write argument `index`
    pub fn write_arg(&mut self, index: usize, ty: &ScalarType, value: ScalarValue) -> Result<(), CallError> {
        assert!(index < self.layout.nargs, "argument {} out of range", index);
        let offset = self.layout.arg_offset(index);
        if write_scalar(&mut self.storage, offset, ty, value) {
            Ok(())
        } else {
            Err(CallError::ArgumentMismatch { index, expected: *ty, found: value })
        }
    }

    /// Read argument `index` back
    pub fn read_arg(&self, index: usize, ty: &ScalarType) -> Option<ScalarValue> {
        assert!(index < self.layout.nargs, "argument {} out of range", index);
        read_scalar(&self.storage, self.layout.arg_offset(index), ty)
    }

    /// Write the result slot
    pub fn write_result(&mut self, ty: &ScalarType, value: ScalarValue) -> Result<(), CallError> {
        if write_scalar(&mut self.storage, self.layout.result_offset(), ty, value) {
            Ok(())
        } else {
            Err(CallError::ResultMismatch { expected: *ty, found: value })
        }
    }

    /// Read the result slot; `None` for void
    pub fn read_result(&self, ty: &ScalarType) -> Option<ScalarValue> {
        read_scalar(&self.storage, self.layout.result_offset(), ty)
    }

    /// Release the buffer now
    pub fn free(self) {
        self.storage.free();
    }
}

// ============================================================================
// Callee side
// ============================================================================

/// Typed view of a live exchange buffer, for native code that only receives
/// its address.
pub struct ExchangeView<'a> {
    slots: RawSlots,
    descr: &'a CallDescriptor,
    layout: ExchangeLayout,
    _buffer: PhantomData<&'a mut [u8]>,
}

impl<'a> ExchangeView<'a> {
    /// View the buffer at `exchange` laid out for `descr` with `stride`.
    ///
    /// # Safety
    ///
    /// `exchange` must point to a live exchange buffer of at least
    /// `ExchangeLayout::for_descriptor(descr, stride).size()` bytes that
    /// nothing else accesses for `'a`. Panics if `stride` is not a valid
    /// exchange stride.
    pub unsafe fn from_raw(descr: &'a CallDescriptor, exchange: *mut u8, stride: usize) -> Self {
        ExchangeView {
            slots: RawSlots { base: exchange, policy: UnalignedPolicy::host() },
            descr,
            layout: ExchangeLayout::with_checked_stride(descr.nargs(), stride),
            _buffer: PhantomData,
        }
    }

    /// Descriptor of the call
    pub fn descriptor(&self) -> &'a CallDescriptor {
        self.descr
    }

    /// Number of arguments
    pub fn nargs(&self) -> usize {
        self.layout.nargs
    }

    /// Argument `index`, or `None` past the end
    pub fn arg(&self, index: usize) -> Option<ScalarValue> {
        let ty = self.descr.arg_types().get(index)?;
        read_scalar(&self.slots, self.layout.arg_offset(index), ty)
    }

    /// All arguments in order
    pub fn args(&self) -> Vec<ScalarValue> {
        (0..self.nargs()).filter_map(|i| self.arg(i)).collect()
    }

    /// Store the call's result. Void calls accept nothing.
    pub fn set_result(&mut self, value: ScalarValue) -> Result<(), CallError> {
        let ty = self.descr.result_type();
        if write_scalar(&mut self.slots, self.layout.result_offset(), &ty, value) {
            Ok(())
        } else {
            Err(CallError::ResultMismatch { expected: ty, found: value })
        }
    }
}

impl std::fmt::Debug for ExchangeView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeView")
            .field("base", &self.slots.base)
            .field("descr", &format_args!("{}", self.descr))
            .field("layout", &self.layout)
            .finish()
    }
}
