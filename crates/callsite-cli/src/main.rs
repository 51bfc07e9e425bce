use callsite_capture::{CaptureOptions, CaptureResult, DebugInfoResolver, capture_with};
use serde::Serialize;
use std::fs;
use std::hint::black_box;
use std::path::PathBuf;
use tracing::{debug, info};

const USAGE: &str = "usage: callsite [--out <snapshots.json>] [--frame-index <n>] [--strip-prefix <n>]";
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct SnapshotBundle {
    schema_version: u32,
    capture_binary: String,
    snapshots: Vec<SnapshotRecord>,
}

#[derive(Debug, Serialize)]
struct SnapshotRecord {
    label: &'static str,
    result: CaptureResult,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = parse_args(std::env::args().skip(1))?;
    let options = CaptureOptions::new()
        .frame_index(args.frame_index)
        .path_prefix_len(args.strip_prefix);

    let snapshots = vec![
        SnapshotRecord {
            label: "direct",
            result: paths::direct(options),
        },
        SnapshotRecord {
            label: "alpha_path",
            result: paths::alpha_path(options),
        },
        SnapshotRecord {
            label: "beta_path",
            result: paths::beta_path(options),
        },
    ];

    for snapshot in &snapshots {
        debug!(
            label = snapshot.label,
            caller = %snapshot.result.caller_info,
            frames = snapshot.result.stack_frames.frame.len(),
            "captured"
        );
    }

    let capture_binary = std::env::current_exe()
        .map_err(|e| format!("failed to resolve current executable path: {e}"))?
        .to_string_lossy()
        .into_owned();

    let bundle = SnapshotBundle {
        schema_version: SCHEMA_VERSION,
        capture_binary,
        snapshots,
    };

    let encoded = serde_json::to_string_pretty(&bundle)
        .map_err(|e| format!("failed to encode snapshot bundle as JSON: {e}"))?;

    match &args.out {
        Some(out_path) => {
            fs::write(out_path, encoded).map_err(|e| {
                format!(
                    "failed to write snapshot bundle to {}: {e}",
                    out_path.display()
                )
            })?;
            info!(
                snapshots = bundle.snapshots.len(),
                out = %out_path.display(),
                "wrote snapshot bundle"
            );
        }
        None => println!("{encoded}"),
    }

    Ok(())
}

mod paths {
    use super::*;

    /// The tag keeps each path's body distinct so release builds keep one
    /// symbol per hop.
    fn tagged(result: CaptureResult, tag: u32) -> CaptureResult {
        black_box(tag);
        black_box(result)
    }

    #[inline(never)]
    pub fn direct(options: CaptureOptions) -> CaptureResult {
        tagged(capture_with(options, &DebugInfoResolver), line!())
    }

    #[inline(never)]
    pub fn alpha_path(options: CaptureOptions) -> CaptureResult {
        black_box(alpha::entry(options))
    }

    #[inline(never)]
    pub fn beta_path(options: CaptureOptions) -> CaptureResult {
        black_box(beta::entry(options))
    }

    mod alpha {
        use super::*;

        #[inline(never)]
        pub fn entry(options: CaptureOptions) -> CaptureResult {
            black_box(hop(options))
        }

        #[inline(never)]
        fn hop(options: CaptureOptions) -> CaptureResult {
            tagged(capture_with(options, &DebugInfoResolver), line!())
        }
    }

    mod beta {
        use super::*;

        #[inline(never)]
        pub fn entry(options: CaptureOptions) -> CaptureResult {
            black_box(first(options))
        }

        #[inline(never)]
        fn first(options: CaptureOptions) -> CaptureResult {
            black_box(second(options))
        }

        #[inline(never)]
        fn second(options: CaptureOptions) -> CaptureResult {
            tagged(capture_with(options, &DebugInfoResolver), line!())
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    out: Option<PathBuf>,
    frame_index: usize,
    strip_prefix: usize,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(flag) = args.next() {
        let mut value = || {
            args.next()
                .ok_or_else(|| format!("{flag} requires a value; {USAGE}"))
        };
        match flag.as_str() {
            "--out" => parsed.out = Some(PathBuf::from(value()?)),
            "--frame-index" => parsed.frame_index = parse_count(&flag, &value()?)?,
            "--strip-prefix" => parsed.strip_prefix = parse_count(&flag, &value()?)?,
            _ => return Err(format!("unknown argument {flag:?}; {USAGE}")),
        }
    }

    Ok(parsed)
}

fn parse_count(flag: &str, value: &str) -> Result<usize, String> {
    value
        .parse()
        .map_err(|e| format!("{flag} expects a non-negative integer, got {value:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, String> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn defaults_without_flags() {
        assert_eq!(args(&[]), Ok(Args::default()));
    }

    #[test]
    fn parses_all_flags() {
        assert_eq!(
            args(&["--out", "snap.json", "--frame-index", "2", "--strip-prefix", "14"]),
            Ok(Args {
                out: Some(PathBuf::from("snap.json")),
                frame_index: 2,
                strip_prefix: 14,
            })
        );
    }

    #[test]
    fn rejects_unknown_and_incomplete_flags() {
        assert!(args(&["--verbose"]).is_err());
        assert!(args(&["--out"]).is_err());
        assert!(args(&["--frame-index", "-1"]).is_err());
    }

    #[test]
    fn paths_report_their_hop() {
        let options = CaptureOptions::new();
        assert!(paths::direct(options).function_name.ends_with("::paths::direct"));
        assert!(
            paths::alpha_path(options)
                .function_name
                .ends_with("::alpha::hop")
        );
        let beta = paths::beta_path(options);
        assert!(beta.function_name.ends_with("::beta::second"));
        assert!(beta.stack_frames.frame[1].function_name.ends_with("::beta::first"));
    }
}
