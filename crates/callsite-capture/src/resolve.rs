use callsite_types::ResolvedFrame;

use crate::snapshot::RawFrame;

/// Maps a raw frame to its original function name and source position.
///
/// Implementations never fail: whatever cannot be resolved is left `None`
/// and the capture substitutes its per-field fallback.
pub trait Resolver {
    fn resolve(&self, frame: &RawFrame) -> ResolvedFrame;
}

impl<F> Resolver for F
where
    F: Fn(&RawFrame) -> ResolvedFrame,
{
    fn resolve(&self, frame: &RawFrame) -> ResolvedFrame {
        self(frame)
    }
}

/// Resolves frames in-process through the `backtrace` symbolizer, using the
/// debug info of whatever module the frame belongs to.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugInfoResolver;

impl Resolver for DebugInfoResolver {
    fn resolve(&self, frame: &RawFrame) -> ResolvedFrame {
        let mut resolved = ResolvedFrame::default();

        // Inlined calls show up as several symbols for one frame, innermost
        // first.
        backtrace::resolve_frame(frame.as_backtrace_frame(), |symbol| {
            if resolved.function_name.is_none()
                && let Some(name) = symbol.name()
            {
                resolved.function_name = Some(format!("{name:#}"));
            }

            if resolved.file_name.is_none()
                && let Some(file) = symbol.filename()
            {
                resolved.file_name = Some(file.display().to_string());
                resolved.line_number = symbol.lineno();
                resolved.column_number = symbol.colno();
            }
        });

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::snapshot;
    use std::hint::black_box;

    #[inline(never)]
    fn resolve_own_frame() -> ResolvedFrame {
        let frames =
            snapshot(resolve_own_frame as usize, None).expect("anchor should be on the stack");
        black_box(DebugInfoResolver.resolve(&frames[0]))
    }

    #[test]
    fn resolves_enclosing_function() {
        let resolved = resolve_own_frame();
        let name = resolved.function_name.expect("function name should resolve");
        assert!(name.ends_with("::resolve_own_frame"), "got {name}");
        if cfg!(debug_assertions) {
            let file = resolved.file_name.expect("file name should resolve");
            assert!(file.ends_with("resolve.rs"), "got {file}");
            assert!(resolved.line_number.is_some_and(|line| line > 0));
        }
    }

    #[test]
    #[inline(never)]
    fn closures_are_resolvers() {
        let fixed = |_: &RawFrame| ResolvedFrame {
            function_name: Some("fixed".to_owned()),
            ..ResolvedFrame::default()
        };
        let frames = snapshot(closures_are_resolvers as usize, None)
            .expect("anchor should be on the stack");
        assert_eq!(fixed.resolve(&frames[0]).function_name.as_deref(), Some("fixed"));
    }
}
