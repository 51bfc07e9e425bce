//! Symbolication straight from module files on disk.
//!
//! Each frame is attributed to its module with `dladdr`, the module's debug
//! info is loaded with `addr2line`, and the runtime address is translated
//! into the module's linked address space before lookup.

use std::cell::RefCell;
use std::collections::HashMap;
use std::error::Error;
use std::ffi::{CStr, c_void};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use addr2line::Loader;
use callsite_types::ResolvedFrame;
use object::{Object, ObjectSegment};
use tracing::debug;

use crate::resolve::Resolver;
use crate::snapshot::RawFrame;

#[derive(Debug)]
pub enum ResolveError {
    MissingModuleInfo { ip: u64 },
    IpBeforeModuleBase { ip: u64, module_base: u64 },
    NotAFile { path: PathBuf },
    LoadDebugInfo { path: PathBuf, reason: String },
    ReadModule { path: PathBuf, source: std::io::Error },
    ParseModule { path: PathBuf, source: object::Error },
    NoFileBackedSegments { path: PathBuf },
    AddressOverflow { linked_base: u64, offset: u64 },
    Lookup { probe: u64, reason: String },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingModuleInfo { ip } => {
                write!(f, "dladdr returned no module info for ip=0x{ip:x}")
            }
            Self::IpBeforeModuleBase { ip, module_base } => write!(
                f,
                "instruction pointer 0x{ip:x} is below module base 0x{module_base:x}"
            ),
            Self::NotAFile { path } => {
                write!(f, "module path is not a file: {}", path.display())
            }
            Self::LoadDebugInfo { path, reason } => write!(
                f,
                "failed to load debug data for module {}: {reason}",
                path.display()
            ),
            Self::ReadModule { path, source } => {
                write!(f, "failed to read module file {}: {source}", path.display())
            }
            Self::ParseModule { path, source } => {
                write!(f, "failed to parse object file {}: {source}", path.display())
            }
            Self::NoFileBackedSegments { path } => write!(
                f,
                "failed to determine linked image base for module {}: no file-backed segments",
                path.display()
            ),
            Self::AddressOverflow {
                linked_base,
                offset,
            } => write!(
                f,
                "address overflow combining linked image base 0x{linked_base:x} with offset 0x{offset:x}"
            ),
            Self::Lookup { probe, reason } => {
                write!(f, "debug info lookup failed at 0x{probe:x}: {reason}")
            }
        }
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ReadModule { source, .. } => Some(source),
            Self::ParseModule { source, .. } => Some(source),
            _ => None,
        }
    }
}

struct LoadedModule {
    loader: Loader,
    linked_image_base: u64,
}

/// Resolver that reads debug info from the module files themselves.
///
/// Loaded modules are cached per resolver, keyed by path. A module that
/// failed to load is remembered as failed and not retried. Not `Sync`; keep
/// one per thread.
#[derive(Default)]
pub struct ModuleResolver {
    modules: RefCell<HashMap<PathBuf, Option<LoadedModule>>>,
}

impl ModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_resolve(&self, frame: &RawFrame) -> Result<ResolvedFrame, ResolveError> {
        let ip = frame.ip() as usize as u64;
        let module = module_info_for_ip(frame.ip())?;

        let offset = ip
            .checked_sub(module.runtime_base)
            .ok_or(ResolveError::IpBeforeModuleBase {
                ip,
                module_base: module.runtime_base,
            })?;
        // Return addresses point one past the call instruction.
        let offset = offset.saturating_sub(1);

        let mut modules = self.modules.borrow_mut();
        let loaded = modules
            .entry(module.path.clone())
            .or_insert_with(|| match LoadedModule::open(&module.path) {
                Ok(loaded) => Some(loaded),
                Err(err) => {
                    debug!(module = %module.path.display(), error = %err, "module symbolication unavailable");
                    None
                }
            });

        match loaded {
            Some(loaded) => loaded.resolve(offset),
            None => Ok(ResolvedFrame::default()),
        }
    }
}

impl fmt::Debug for ModuleResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleResolver")
            .field("modules", &self.modules.borrow().len())
            .finish()
    }
}

impl Resolver for ModuleResolver {
    fn resolve(&self, frame: &RawFrame) -> ResolvedFrame {
        match self.try_resolve(frame) {
            Ok(resolved) => {
                if resolved.is_empty() {
                    debug!(ip = frame.ip() as usize, "no debug info covers frame");
                }
                resolved
            }
            Err(err) => {
                debug!(error = %err, "frame left unresolved");
                ResolvedFrame::default()
            }
        }
    }
}

impl LoadedModule {
    fn open(path: &Path) -> Result<Self, ResolveError> {
        if !path.is_file() {
            return Err(ResolveError::NotAFile {
                path: path.to_owned(),
            });
        }

        let loader = Loader::new(path).map_err(|e| ResolveError::LoadDebugInfo {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        let linked_image_base = linked_image_base_for_file(path)?;

        Ok(Self {
            loader,
            linked_image_base,
        })
    }

    fn resolve(&self, offset: u64) -> Result<ResolvedFrame, ResolveError> {
        let probe =
            self.linked_image_base
                .checked_add(offset)
                .ok_or(ResolveError::AddressOverflow {
                    linked_base: self.linked_image_base,
                    offset,
                })?;

        let mut resolved = ResolvedFrame::default();

        let mut frames = self
            .loader
            .find_frames(probe)
            .map_err(|e| ResolveError::Lookup {
                probe,
                reason: e.to_string(),
            })?;

        while let Some(frame) = frames.next().map_err(|e| ResolveError::Lookup {
            probe,
            reason: e.to_string(),
        })? {
            if resolved.function_name.is_none()
                && let Some(func) = frame.function
            {
                if let Ok(demangled) = func.demangle() {
                    resolved.function_name = Some(strip_rust_hash_suffix(&demangled).to_owned());
                } else if let Ok(raw) = func.raw_name() {
                    resolved.function_name = Some(raw.into_owned());
                }
            }

            if resolved.file_name.is_none()
                && let Some(location) = frame.location
            {
                apply_location(&mut resolved, location.file, location.line, location.column);
            }

            if resolved.function_name.is_some() && resolved.file_name.is_some() {
                break;
            }
        }

        if resolved.function_name.is_none()
            && let Some(symbol) = self.loader.find_symbol(probe)
        {
            let demangled = addr2line::demangle_auto(symbol.into(), None);
            resolved.function_name = Some(strip_rust_hash_suffix(&demangled).to_owned());
        }

        if resolved.file_name.is_none()
            && let Some(location) = self
                .loader
                .find_location(probe)
                .map_err(|e| ResolveError::Lookup {
                    probe,
                    reason: e.to_string(),
                })?
        {
            apply_location(&mut resolved, location.file, location.line, location.column);
        }

        Ok(resolved)
    }
}

/// Records a location. One that names a file replaces any position taken
/// earlier; one without a file only fills a position still missing.
fn apply_location(
    resolved: &mut ResolvedFrame,
    file: Option<&str>,
    line: Option<u32>,
    column: Option<u32>,
) {
    match file {
        Some(file) => {
            resolved.file_name = Some(file.to_owned());
            resolved.line_number = line;
            resolved.column_number = column;
        }
        None if resolved.line_number.is_none() => {
            resolved.line_number = line;
            resolved.column_number = column;
        }
        None => {}
    }
}

struct ModuleInfo {
    runtime_base: u64,
    path: PathBuf,
}

fn module_info_for_ip(ip: *mut c_void) -> Result<ModuleInfo, ResolveError> {
    let missing = || ResolveError::MissingModuleInfo {
        ip: ip as usize as u64,
    };

    let mut info = std::mem::MaybeUninit::<libc::Dl_info>::zeroed();
    let ok = unsafe { libc::dladdr(ip as *const c_void, info.as_mut_ptr()) };
    if ok == 0 {
        return Err(missing());
    }

    let info = unsafe { info.assume_init() };
    if info.dli_fbase.is_null() {
        return Err(missing());
    }

    let path = if info.dli_fname.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(info.dli_fname) }
            .to_string_lossy()
            .into_owned()
    };

    // The main executable may be reported without a name.
    let path = if path.is_empty() {
        std::env::current_exe().map_err(|_| missing())?
    } else {
        PathBuf::from(path)
    };

    Ok(ModuleInfo {
        runtime_base: info.dli_fbase as usize as u64,
        path,
    })
}

fn linked_image_base_for_file(path: &Path) -> Result<u64, ResolveError> {
    let data = fs::read(path).map_err(|source| ResolveError::ReadModule {
        path: path.to_owned(),
        source,
    })?;
    let object = object::File::parse(&*data).map_err(|source| ResolveError::ParseModule {
        path: path.to_owned(),
        source,
    })?;

    object
        .segments()
        .filter_map(|seg| {
            let (_, file_size) = seg.file_range();
            if file_size == 0 {
                return None;
            }
            Some(seg.address())
        })
        .min()
        .ok_or_else(|| ResolveError::NoFileBackedSegments {
            path: path.to_owned(),
        })
}

fn strip_rust_hash_suffix(name: &str) -> &str {
    if let Some(idx) = name.rfind("::h") {
        let suffix = &name[idx + 3..];
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return &name[..idx];
        }
    }
    name
}
