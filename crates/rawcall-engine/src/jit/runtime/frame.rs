//! Forcible frames
//!
//! Every native call that may re-enter managed code registers a frame for the
//! optimized caller. Re-entrant code that needs the caller's full state forces
//! that frame; the call's guard sees the mark once the callee returns.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle to an optimized frame that may be forced
#[derive(Debug, Clone, Default)]
pub struct FrameRef {
    forced: Arc<AtomicBool>,
}

impl FrameRef {
    /// A fresh, unforced frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the frame as forced
    pub fn force(&self) {
        self.forced.store(true, Ordering::Release);
    }

    /// Whether the frame has been forced
    pub fn is_forced(&self) -> bool {
        self.forced.load(Ordering::Acquire)
    }

    /// Whether both handles name the same frame
    pub fn same_frame(&self, other: &FrameRef) -> bool {
        Arc::ptr_eq(&self.forced, &other.forced)
    }
}

thread_local! {
    static FRAMES: RefCell<Vec<FrameRef>> = const { RefCell::new(Vec::new()) };
}

/// Registers a frame as the thread's innermost one until dropped
#[derive(Debug)]
pub struct FrameScope {
    frame: FrameRef,
}

impl FrameScope {
    /// Push a fresh frame
    pub fn enter() -> Self {
        let frame = FrameRef::new();
        FRAMES.with(|frames| frames.borrow_mut().push(frame.clone()));
        FrameScope { frame }
    }

    /// The registered frame
    pub fn frame(&self) -> &FrameRef {
        &self.frame
    }
}

impl Drop for FrameScope {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            match frames.iter().rposition(|f| f.same_frame(&self.frame)) {
                Some(pos) if pos + 1 == frames.len() => {
                    frames.pop();
                }
                Some(pos) => {
                    tracing::warn!(depth = frames.len(), pos, "frame scope dropped out of order");
                    frames.remove(pos);
                }
                None => tracing::error!("dropped frame scope was not registered"),
            }
        });
    }
}

/// The calling thread's innermost registered frame
pub fn current_frame() -> Option<FrameRef> {
    FRAMES.with(|frames| frames.borrow().last().cloned())
}

/// Force the innermost frame of the calling thread.
///
/// Returns false when no frame is registered.
pub fn force_current_frame() -> bool {
    match current_frame() {
        Some(frame) => {
            frame.force();
            tracing::trace!("forced innermost frame");
            true
        }
        None => false,
    }
}

/// Number of frames registered on the calling thread
pub fn frame_depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}
