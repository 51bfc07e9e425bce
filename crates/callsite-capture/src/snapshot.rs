use std::ffi::c_void;
use std::num::NonZeroUsize;

use tracing::{debug, trace};

/// One unresolved stack entry, as the unwinder saw it.
#[derive(Debug, Clone)]
pub struct RawFrame {
    frame: backtrace::Frame,
}

impl RawFrame {
    pub(crate) fn new(frame: backtrace::Frame) -> Self {
        Self { frame }
    }

    /// Instruction pointer of the frame. For every frame but the innermost
    /// this is a return address, one instruction past the call.
    pub fn ip(&self) -> *mut c_void {
        self.frame.ip()
    }

    /// Start address of the function enclosing [`RawFrame::ip`], if the
    /// unwinder knows it.
    pub fn symbol_address(&self) -> *mut c_void {
        self.frame.symbol_address()
    }

    pub fn as_backtrace_frame(&self) -> &backtrace::Frame {
        &self.frame
    }
}

/// Walks the current thread's stack and returns the frames from `anchor`
/// (inclusive) down to the bottom of the stack.
///
/// `anchor` is the address of the public entry point; everything above it
/// is unwinder machinery and this helper. Returns `None` when no frame
/// starts at `anchor`, since offsets from the caller are meaningless then.
#[inline(never)]
pub(crate) fn snapshot(anchor: usize, max_frames: Option<NonZeroUsize>) -> Option<Vec<RawFrame>> {
    let mut frames = Vec::new();
    let mut start = None;

    // `trace` holds the unwinder's global lock until the walk returns.
    backtrace::trace(|frame| {
        if start.is_none() && frame.symbol_address() as usize == anchor {
            start = Some(frames.len());
        }
        frames.push(RawFrame::new(frame.clone()));

        match (start, max_frames) {
            (Some(start), Some(max)) => frames.len() - start < max.get(),
            _ => true,
        }
    });

    match start {
        Some(start) => {
            trace!(skipped = start, kept = frames.len() - start, "stack snapshot");
            Some(frames.split_off(start))
        }
        None => {
            debug!(
                frames = frames.len(),
                anchor,
                "entry point not found in stack walk"
            );
            None
        }
    }
}
