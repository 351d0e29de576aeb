//! Dynamic Library Loading
//!
//! Safe wrapper around libloading for opening library images, or the
//! process's own symbol namespace, and resolving exported symbols.

use std::ffi::{c_void, CString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};
use tracing::{debug, instrument, trace};

use super::error::{FfiError, FfiResult};

/// Where a library handle came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySource {
    /// The process's default global symbol namespace
    Process,
    /// An image opened by path or platform library name
    Path(PathBuf),
}

impl fmt::Display for LibrarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibrarySource::Process => write!(f, "<process>"),
            LibrarySource::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A loaded library image.
///
/// Handles are immutable once opened and are shared through `Arc`; they are
/// never unloaded while any declared function still refers to them.
pub struct LibraryHandle {
    source: LibrarySource,
    library: Library,
}

/// Open a library by path, or the process namespace when `library_path` is
/// `None`.
pub fn load(library_path: Option<&Path>) -> FfiResult<Arc<LibraryHandle>> {
    let handle = match library_path {
        Some(path) => LibraryHandle::open(path)?,
        None => LibraryHandle::process()?,
    };
    Ok(Arc::new(handle))
}

impl LibraryHandle {
    /// Open the process's default global symbol namespace
    #[instrument(name = "ffi::library::process", level = "debug")]
    pub fn process() -> FfiResult<Self> {
        #[cfg(unix)]
        let library: Library = libloading::os::unix::Library::this().into();

        #[cfg(windows)]
        let library: Library = libloading::os::windows::Library::this()
            .map_err(|e| FfiError::LibraryNotFound {
                library: LibrarySource::Process.to_string(),
                reason: e.to_string(),
            })?
            .into();

        #[cfg(not(any(unix, windows)))]
        return Err(FfiError::LibraryNotFound {
            library: LibrarySource::Process.to_string(),
            reason: "process namespace is not available on this platform".to_string(),
        });

        #[cfg(any(unix, windows))]
        {
            debug!("opened process symbol namespace");
            Ok(Self {
                source: LibrarySource::Process,
                library,
            })
        }
    }

    /// Open a library image by path or platform library name
    #[instrument(name = "ffi::library::open", level = "debug", skip(path), fields(path = %path.display()))]
    pub fn open(path: &Path) -> FfiResult<Self> {
        // Safety: loading runs the image's initializers. The caller chose the
        // path and trusts the code in it.
        let library = unsafe { Library::new(path) }.map_err(|e| FfiError::LibraryNotFound {
            library: path.display().to_string(),
            reason: e.to_string(),
        })?;

        debug!("opened library image");
        Ok(Self {
            source: LibrarySource::Path(path.to_path_buf()),
            library,
        })
    }

    pub fn source(&self) -> &LibrarySource {
        &self.source
    }

    /// Name used in diagnostics
    pub fn display_name(&self) -> String {
        self.source.to_string()
    }

    /// Resolve an exported symbol to its address.
    ///
    /// Names are matched exactly: case-sensitive, no demangling.
    pub fn symbol(&self, name: &str) -> FfiResult<usize> {
        let not_found = |reason: String| FfiError::SymbolNotFound {
            symbol: name.to_string(),
            library: self.display_name(),
            reason,
        };

        if name.is_empty() {
            return Err(not_found("empty symbol name".to_string()));
        }
        let c_name =
            CString::new(name).map_err(|_| not_found("name contains a NUL byte".to_string()))?;

        // Safety: the symbol is only read as an address here. Its type is
        // asserted later by the declared signature.
        let symbol: Symbol<*const c_void> = unsafe { self.library.get(c_name.as_bytes_with_nul()) }
            .map_err(|e| not_found(e.to_string()))?;

        let addr = *symbol as usize;
        if addr == 0 {
            return Err(not_found("symbol resolves to a null address".to_string()));
        }

        trace!(symbol = name, addr, "resolved symbol");
        Ok(addr)
    }
}

impl fmt::Debug for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryHandle")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Resolves short library names against search paths
#[derive(Debug, Clone)]
pub struct LibraryLoader {
    search_paths: Vec<PathBuf>,
}

impl LibraryLoader {
    /// Create a loader with the platform's default search paths
    pub fn new() -> Self {
        Self {
            search_paths: default_search_paths(),
        }
    }

    /// Add a search path, consulted before the defaults
    pub fn add_search_path(&mut self, path: impl AsRef<Path>) {
        self.search_paths.insert(0, path.as_ref().to_path_buf());
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find a library file by name or path
    pub fn find_library(&self, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if path.is_file() {
            return Some(path.to_path_buf());
        }

        let lib_name = library_filename(name);
        self.search_paths
            .iter()
            .map(|dir| dir.join(&lib_name))
            .find(|candidate| candidate.is_file())
    }

    /// Open a library by name.
    ///
    /// Names not found on the search paths are handed to the platform
    /// loader as-is, so sonames such as `libm.so.6` still resolve.
    pub fn load(&self, name: &str) -> FfiResult<Arc<LibraryHandle>> {
        match self.find_library(name) {
            Some(path) => load(Some(&path)),
            None => {
                trace!(library = name, "not on search paths, deferring to platform loader");
                load(Some(Path::new(name)))
            }
        }
    }
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the default library search paths for this platform
fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd);
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(ld_path) = std::env::var("LD_LIBRARY_PATH") {
            paths.extend(ld_path.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/lib64"));
        paths.push(PathBuf::from("/lib"));
        paths.push(PathBuf::from("/lib64"));
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(dyld_path) = std::env::var("DYLD_LIBRARY_PATH") {
            paths.extend(dyld_path.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/opt/homebrew/lib"));
        paths.push(PathBuf::from("/usr/lib"));
    }

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from("C:\\Windows\\System32"));
        if let Ok(path) = std::env::var("PATH") {
            paths.extend(path.split(';').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
    }

    paths
}

/// Construct the platform-specific library filename
pub(crate) fn library_filename(name: &str) -> String {
    if name.contains('/') || name.contains('\\') {
        return name.to_string();
    }

    #[cfg(target_os = "macos")]
    {
        if name.ends_with(".dylib") {
            name.to_string()
        } else {
            format!("lib{}.dylib", name)
        }
    }

    #[cfg(target_os = "windows")]
    {
        if name.to_ascii_lowercase().ends_with(".dll") {
            name.to_string()
        } else {
            format!("{}.dll", name)
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        if name.contains(".so") {
            name.to_string()
        } else {
            format!("lib{}.so", name)
        }
    }
}
