//! Serializable model of a call-site snapshot.
//!
//! A [`CaptureResult`] describes one target frame (the "caller") plus every
//! frame below it. Field names serialize in camelCase, and absent
//! line/column positions are omitted from the output rather than written
//! as `null`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder used wherever a resolver could not name a function or file.
pub const UNKNOWN: &str = "unknown";

/// A frame after symbolication. Every field is optional: resolvers fill in
/// what the available debug info provides and leave the rest `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFrame {
    pub function_name: Option<String>,
    pub file_name: Option<String>,
    pub line_number: Option<u32>,
    pub column_number: Option<u32>,
}

impl ResolvedFrame {
    pub fn is_empty(&self) -> bool {
        self.function_name.is_none()
            && self.file_name.is_none()
            && self.line_number.is_none()
            && self.column_number.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDescriptor {
    pub function_name: String,
    pub file_name: String,
    /// Decimal line number, absent when the resolver had no position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<String>,
}

impl FrameDescriptor {
    pub fn from_resolved(frame: &ResolvedFrame) -> Self {
        Self {
            function_name: frame
                .function_name
                .clone()
                .unwrap_or_else(|| UNKNOWN.to_owned()),
            file_name: frame
                .file_name
                .clone()
                .unwrap_or_else(|| UNKNOWN.to_owned()),
            line_number: frame.line_number.map(|line| line.to_string()),
            column_number: frame.column_number.map(|column| column.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrames {
    /// Innermost first, starting at the target frame.
    pub frame: Vec<FrameDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    /// `<function> (<file>:<line>:<column>)` for the target frame.
    pub caller_info: String,
    pub function_name: String,
    pub stack_frames: StackFrames,
}

impl CaptureResult {
    /// The result returned when the requested frame lies past the bottom of
    /// the stack.
    pub fn unknown() -> Self {
        Self {
            caller_info: CallerInfo {
                function_name: UNKNOWN,
                file_name: UNKNOWN,
                line_number: 0,
                column_number: 0,
            }
            .to_string(),
            function_name: UNKNOWN.to_owned(),
            stack_frames: StackFrames::default(),
        }
    }

    /// Builds a result from the resolved frames of the target and everything
    /// below it. `frames[0]` is the target. An empty slice yields
    /// [`CaptureResult::unknown`].
    pub fn from_resolved(frames: &[ResolvedFrame], path_prefix_len: usize) -> Self {
        let Some(target) = frames.first() else {
            return Self::unknown();
        };

        let function_name = target
            .function_name
            .clone()
            .unwrap_or_else(|| UNKNOWN.to_owned());
        let file_name = target.file_name.as_deref().unwrap_or("");

        let caller_info = CallerInfo {
            function_name: &function_name,
            file_name: strip_path_prefix(file_name, path_prefix_len),
            line_number: target.line_number.unwrap_or(0),
            column_number: target.column_number.unwrap_or(0),
        }
        .to_string();

        Self {
            caller_info,
            function_name,
            stack_frames: StackFrames {
                frame: frames.iter().map(FrameDescriptor::from_resolved).collect(),
            },
        }
    }
}

struct CallerInfo<'a> {
    function_name: &'a str,
    file_name: &'a str,
    line_number: u32,
    column_number: u32,
}

impl fmt::Display for CallerInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{}:{})",
            self.function_name, self.file_name, self.line_number, self.column_number
        )
    }
}

/// Drops the first `len` characters of `path`. Lengths past the end give an
/// empty string.
pub fn strip_path_prefix(path: &str, len: usize) -> &str {
    match path.char_indices().nth(len) {
        Some((idx, _)) => &path[idx..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(name: &str, file: &str, line: u32, column: u32) -> ResolvedFrame {
        ResolvedFrame {
            function_name: Some(name.to_owned()),
            file_name: Some(file.to_owned()),
            line_number: Some(line),
            column_number: Some(column),
        }
    }

    #[test]
    fn unknown_result_wire_shape() {
        let json = serde_json::to_string_pretty(&CaptureResult::unknown())
            .expect("capture result must serialize");
        insta::assert_snapshot!(json, @r#"
{
  "callerInfo": "unknown (unknown:0:0)",
  "functionName": "unknown",
  "stackFrames": {
    "frame": []
  }
}
"#);
    }

    #[test]
    fn resolved_frame_emptiness() {
        assert!(ResolvedFrame::default().is_empty());
        let partial = ResolvedFrame {
            line_number: Some(3),
            ..ResolvedFrame::default()
        };
        assert!(!partial.is_empty());
    }

    #[test]
    fn empty_slice_is_unknown() {
        assert_eq!(CaptureResult::from_resolved(&[], 3), CaptureResult::unknown());
    }

    #[test]
    fn caller_info_uses_target_frame() {
        let frames = [
            resolved("app::handlers::on_request", "/srv/app/src/handlers.rs", 42, 9),
            resolved("app::main", "/srv/app/src/main.rs", 7, 5),
        ];
        let result = CaptureResult::from_resolved(&frames, 0);

        assert_eq!(
            result.caller_info,
            "app::handlers::on_request (/srv/app/src/handlers.rs:42:9)"
        );
        assert_eq!(result.function_name, "app::handlers::on_request");
        assert_eq!(result.stack_frames.frame.len(), 2);
        assert_eq!(result.stack_frames.frame[0].function_name, result.function_name);
        assert_eq!(result.stack_frames.frame[1].function_name, "app::main");
    }

    #[test]
    fn prefix_applies_to_caller_info_only() {
        let frames = [resolved("app::run", "/srv/app/src/lib.rs", 3, 1)];
        let result = CaptureResult::from_resolved(&frames, "/srv/app/".len());

        assert_eq!(result.caller_info, "app::run (src/lib.rs:3:1)");
        assert_eq!(result.stack_frames.frame[0].file_name, "/srv/app/src/lib.rs");
    }

    #[test]
    fn missing_fields_fall_back_per_field() {
        let result = CaptureResult::from_resolved(&[ResolvedFrame::default()], 0);

        assert_eq!(result.caller_info, "unknown (:0:0)");
        assert_eq!(result.function_name, "unknown");
        assert_eq!(
            result.stack_frames.frame,
            vec![FrameDescriptor {
                function_name: "unknown".to_owned(),
                file_name: "unknown".to_owned(),
                line_number: None,
                column_number: None,
            }]
        );
    }

    #[test]
    fn absent_positions_are_omitted_from_json() {
        let descriptor = FrameDescriptor::from_resolved(&ResolvedFrame {
            function_name: Some("app::run".to_owned()),
            line_number: Some(12),
            ..ResolvedFrame::default()
        });
        let json = serde_json::to_string(&descriptor).expect("descriptor must serialize");

        assert_eq!(
            json,
            r#"{"functionName":"app::run","fileName":"unknown","lineNumber":"12"}"#
        );
    }

    #[test]
    fn strip_path_prefix_bounds() {
        assert_eq!(strip_path_prefix("src/lib.rs", 0), "src/lib.rs");
        assert_eq!(strip_path_prefix("src/lib.rs", 4), "lib.rs");
        assert_eq!(strip_path_prefix("src/lib.rs", 10), "");
        assert_eq!(strip_path_prefix("src/lib.rs", usize::MAX), "");
        assert_eq!(strip_path_prefix("", 1), "");
    }

    #[test]
    fn strip_path_prefix_counts_characters() {
        assert_eq!(strip_path_prefix("/häuser/lib.rs", 3), "user/lib.rs");
    }

    #[test]
    fn stripped_length_never_grows() {
        let path = "/home/builder/project/src/main.rs";
        let mut previous = path.len();
        for len in 0..=path.len() + 2 {
            let stripped = strip_path_prefix(path, len);
            assert_eq!(stripped.len(), path.len().saturating_sub(len));
            assert!(stripped.len() <= previous);
            previous = stripped.len();
        }
    }
}
