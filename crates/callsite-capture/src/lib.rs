//! Call-site capture.
//!
//! [`capture`] walks the current stack, resolves the caller (and every frame
//! below it) to function name, file, line and column, and returns a
//! serializable [`CaptureResult`]. It is meant for attaching "who called
//! this" context to log lines and error reports.
//!
//! ```no_run
//! fn handle_request() {
//!     let site = callsite_capture::capture(0, 0);
//!     println!("{}", site.caller_info);
//! }
//! ```

use std::hint::black_box;
use std::num::NonZeroUsize;

use tracing::trace;

pub use callsite_types::{
    CaptureResult, FrameDescriptor, ResolvedFrame, StackFrames, UNKNOWN, strip_path_prefix,
};

mod resolve;
mod snapshot;

#[cfg(unix)]
mod module;

pub use resolve::{DebugInfoResolver, Resolver};
pub use snapshot::RawFrame;

#[cfg(unix)]
pub use module::{ModuleResolver, ResolveError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Which frame to report, 0 being the direct caller of the capture.
    pub frame_index: usize,
    /// Characters stripped from the front of the target's file name in
    /// `caller_info`.
    pub path_prefix_len: usize,
    /// Upper bound on frames collected, counted from the capture entry
    /// point. `None` walks to the bottom of the stack.
    pub max_frames: Option<NonZeroUsize>,
}

impl CaptureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_index(mut self, frame_index: usize) -> Self {
        self.frame_index = frame_index;
        self
    }

    pub fn path_prefix_len(mut self, path_prefix_len: usize) -> Self {
        self.path_prefix_len = path_prefix_len;
        self
    }

    pub fn max_frames(mut self, max_frames: NonZeroUsize) -> Self {
        self.max_frames = Some(max_frames);
        self
    }
}

/// Captures the call site `frame_index` frames above the caller, resolved
/// with [`DebugInfoResolver`].
///
/// Returns [`CaptureResult::unknown`] when the stack is shallower than
/// `frame_index`.
#[inline(never)]
pub fn capture(frame_index: usize, path_prefix_len: usize) -> CaptureResult {
    let options = CaptureOptions {
        frame_index,
        path_prefix_len,
        max_frames: None,
    };
    black_box(capture_from(
        capture as usize,
        options,
        &DebugInfoResolver,
    ))
}

/// Like [`capture`], with explicit options and resolver.
#[inline(never)]
pub fn capture_with<R>(options: CaptureOptions, resolver: &R) -> CaptureResult
where
    R: Resolver + ?Sized,
{
    black_box(capture_from(capture_with::<R> as usize, options, resolver))
}

fn capture_from<R>(anchor: usize, options: CaptureOptions, resolver: &R) -> CaptureResult
where
    R: Resolver + ?Sized,
{
    let Some(frames) = snapshot::snapshot(anchor, options.max_frames) else {
        return CaptureResult::unknown();
    };

    // frames[0] is the entry point itself.
    let target = options.frame_index.saturating_add(1);
    if target >= frames.len() {
        trace!(
            frame_index = options.frame_index,
            depth = frames.len(),
            "frame index past bottom of stack"
        );
        return CaptureResult::unknown();
    }

    let resolved: Vec<ResolvedFrame> = frames[target..]
        .iter()
        .map(|frame| resolver.resolve(frame))
        .collect();

    CaptureResult::from_resolved(&resolved, options.path_prefix_len)
}
