//! Dynamic library loading and symbol resolution
//!
//! A [`Library`] wraps a [`SymbolSource`] and memoizes the function cdata it
//! hands out. Three sources exist:
//! - [`ProcessImage`]: everything already linked into the process, never closed
//! - [`NativeModule`]: a shared object opened with `dlopen`, closed on drop
//! - [`SymbolTable`]: an in-memory name → address table for embedding hosts
//!
//! Short library names go through [`LibraryLoader`], which applies
//! platform naming conventions over the configured search paths.

use crate::cdata::CDataRef;
use crate::error::{FfiError, FfiResult};
use crate::runtime::Ffi;
use libloading::os::unix::{Library as RawLibrary, RTLD_GLOBAL, RTLD_LAZY, RTLD_LOCAL};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::mem::ManuallyDrop;
use std::os::raw::c_void;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

/// Shared handle to a library
pub type LibraryRef = Rc<Library>;

/// Library loading errors
#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    /// Short name matched nothing in the search paths and the system loader
    LibraryNotFound(String),
    /// The platform loader refused the module
    LoadFailed { library: String, reason: String },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::LibraryNotFound(name) => write!(f, "library not found: {}", name),
            LoadError::LoadFailed { library, reason } => {
                write!(f, "failed to load library '{}': {}", library, reason)
            }
        }
    }
}

impl std::error::Error for LoadError {}

impl From<LoadError> for FfiError {
    fn from(e: LoadError) -> Self {
        FfiError::Resource(e.to_string())
    }
}

/// Where a library finds symbol addresses
pub trait SymbolSource {
    /// Address of `name`, if exported
    fn symbol(&self, name: &str) -> Option<*mut c_void>;

    /// Native module handle, `None` for the whole process
    fn handle(&self) -> Option<*mut c_void> {
        None
    }
}

/// Every symbol visible in the running process (`dlopen(NULL)`)
pub struct ProcessImage {
    inner: ManuallyDrop<RawLibrary>,
}

impl ProcessImage {
    pub fn new() -> Self {
        Self {
            inner: ManuallyDrop::new(RawLibrary::this()),
        }
    }
}

impl Default for ProcessImage {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolSource for ProcessImage {
    fn symbol(&self, name: &str) -> Option<*mut c_void> {
        lookup(&self.inner, name)
    }
}

/// A shared object opened by path
pub struct NativeModule {
    inner: RawLibrary,
    handle: *mut c_void,
}

impl NativeModule {
    /// `dlopen(path, RTLD_LAZY | RTLD_GLOBAL/RTLD_LOCAL)`
    pub fn open(path: impl AsRef<Path>, global: bool) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let flags = RTLD_LAZY | if global { RTLD_GLOBAL } else { RTLD_LOCAL };
        // SAFETY: loading runs the module's initializers; the caller trusts it
        let library = unsafe { RawLibrary::open(Some(path), flags) }.map_err(|e| {
            LoadError::LoadFailed {
                library: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        let handle = library.into_raw();
        // SAFETY: handle was just produced by `into_raw`
        let inner = unsafe { RawLibrary::from_raw(handle) };
        Ok(Self { inner, handle })
    }
}

impl SymbolSource for NativeModule {
    fn symbol(&self, name: &str) -> Option<*mut c_void> {
        lookup(&self.inner, name)
    }

    fn handle(&self) -> Option<*mut c_void> {
        Some(self.handle)
    }
}

fn lookup(library: &RawLibrary, name: &str) -> Option<*mut c_void> {
    // SAFETY: the symbol is only read as an address
    let symbol = unsafe { library.get::<*mut c_void>(name.as_bytes()) }.ok()?;
    let address = *symbol;
    (!address.is_null()).then_some(address)
}

/// In-memory symbols, for hosts that hand out their own function pointers
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address` under `name`
    pub fn insert(&mut self, name: impl Into<String>, address: *const c_void) {
        self.symbols.insert(name.into(), address as usize);
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, name: impl Into<String>, address: *const c_void) -> Self {
        self.insert(name, address);
        self
    }
}

impl SymbolSource for SymbolTable {
    fn symbol(&self, name: &str) -> Option<*mut c_void> {
        self.symbols.get(name).map(|a| *a as *mut c_void)
    }

    fn handle(&self) -> Option<*mut c_void> {
        Some(self as *const Self as *mut c_void)
    }
}

/// Library handle with a per-handle cache of resolved functions
pub struct Library {
    source: Box<dyn SymbolSource>,
    functions: RefCell<HashMap<String, CDataRef>>,
}

impl Library {
    pub fn new(source: impl SymbolSource + 'static) -> LibraryRef {
        Rc::new(Self {
            source: Box::new(source),
            functions: RefCell::new(HashMap::new()),
        })
    }

    /// Raw symbol lookup, bypassing declarations
    pub fn symbol(&self, name: &str) -> Option<*mut c_void> {
        self.source.symbol(name)
    }

    /// `lib.name`: a callable cdata for declared function `name`
    ///
    /// The prototype must have been declared through `ffi.cdef`, even when
    /// the module exports the symbol.
    pub fn get(&self, ffi: &Ffi, name: &str) -> FfiResult<CDataRef> {
        if let Some(cached) = self.functions.borrow().get(name) {
            return Ok(cached.clone());
        }

        let fn_type = ffi.function_type(name).ok_or_else(|| {
            FfiError::resource(format!("missing declaration for function '{}'", name))
        })?;
        let address = self
            .source
            .symbol(name)
            .ok_or_else(|| FfiError::resource(format!("undefined function '{}'", name)))?;

        let func = crate::cdata::CData::pointer(fn_type, address)?;
        debug!(function = name, address = ?address, "resolved symbol");
        self.functions
            .borrow_mut()
            .insert(name.to_string(), func.clone());
        Ok(func)
    }

    /// Number of functions resolved so far
    pub fn cached_count(&self) -> usize {
        self.functions.borrow().len()
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source.handle() {
            None => write!(f, "library: default"),
            Some(handle) => write!(f, "library: {:p}", handle),
        }
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("handle", &self.source.handle())
            .field("cached", &self.cached_count())
            .finish()
    }
}

/// Resolves short library names against search paths
pub struct LibraryLoader {
    search_paths: Vec<PathBuf>,
}

impl LibraryLoader {
    /// Loader with the platform's default search paths
    pub fn new() -> Self {
        Self {
            search_paths: Self::default_search_paths(),
        }
    }

    /// Current directory first, then the usual system directories
    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }

        #[cfg(target_os = "linux")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/lib"));
            if cfg!(target_pointer_width = "64") {
                paths.push(PathBuf::from("/usr/lib64"));
                paths.push(PathBuf::from("/lib64"));
            }
        }

        #[cfg(target_os = "macos")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/opt/homebrew/lib"));
        }

        paths
    }

    /// Add a search path ahead of the existing ones
    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.insert(0, path);
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find `lib{name}.{ext}` or `{name}.{ext}` in the search paths
    ///
    /// Names containing a `/` are paths and are not searched.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if name.contains('/') {
            return Some(PathBuf::from(name));
        }

        let extensions: &[&str] = if cfg!(target_os = "macos") {
            &["dylib", "so"]
        } else {
            &["so"]
        };

        for dir in &self.search_paths {
            let exact = dir.join(name);
            if exact.is_file() {
                return Some(exact);
            }
            for prefix in ["lib", ""] {
                for ext in extensions {
                    let candidate = dir.join(format!("{}{}.{}", prefix, name, ext));
                    if candidate.is_file() {
                        return Some(candidate);
                    }
                }
            }
        }

        None
    }

    /// Open a module by path or short name
    ///
    /// Unresolved short names are handed to the system loader unchanged so
    /// that names like `libc.so.6` still work through its own search rules.
    pub fn open(&self, name: &str, global: bool) -> Result<NativeModule, LoadError> {
        if name.is_empty() {
            return Err(LoadError::LibraryNotFound(name.to_string()));
        }
        match self.resolve(name) {
            Some(path) => NativeModule::open(path, global),
            None => NativeModule::open(name, global).map_err(|e| match e {
                LoadError::LoadFailed { reason, .. } if reason.contains("No such file") => {
                    LoadError::LibraryNotFound(name.to_string())
                }
                other => other,
            }),
        }
    }
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_search_paths_start_with_cwd() {
        let paths = LibraryLoader::default_search_paths();
        assert!(!paths.is_empty());
        if let Ok(cwd) = std::env::current_dir() {
            assert_eq!(paths[0], cwd);
        }
    }

    #[test]
    fn test_custom_search_path_goes_first() {
        let mut loader = LibraryLoader::new();
        loader.add_search_path(PathBuf::from("/custom/path"));
        assert_eq!(loader.search_paths()[0], PathBuf::from("/custom/path"));
    }

    #[test]
    fn test_resolve_with_lib_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("libdemo.so");
        std::fs::write(&file, b"").unwrap();

        let mut loader = LibraryLoader::new();
        loader.add_search_path(dir.path().to_path_buf());
        #[cfg(target_os = "linux")]
        assert_eq!(loader.resolve("demo"), Some(file));
        assert_eq!(loader.resolve("missing_xyz"), None);
    }

    #[test]
    fn test_paths_are_not_searched() {
        let loader = LibraryLoader::new();
        assert_eq!(
            loader.resolve("./libthing.so"),
            Some(PathBuf::from("./libthing.so"))
        );
    }

    #[test]
    fn test_missing_library() {
        let loader = LibraryLoader::new();
        let err = loader.open("nonexistent_library_xyz", false).err().unwrap();
        assert!(matches!(
            err,
            LoadError::LibraryNotFound(_) | LoadError::LoadFailed { .. }
        ));
    }

    #[test]
    fn test_process_image_finds_libc() {
        let image = ProcessImage::new();
        assert!(image.symbol("strlen").is_some());
        assert!(image.symbol("no_such_symbol_xyz").is_none());
    }

    #[test]
    fn test_symbol_table() {
        let table = SymbolTable::new().with("answer", 42 as *const c_void);
        assert_eq!(table.symbol("answer"), Some(42 as *mut c_void));
        assert_eq!(table.symbol("question"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Library::new(ProcessImage::new()).to_string(), "library: default");
        assert!(Library::new(SymbolTable::new())
            .to_string()
            .starts_with("library: 0x"));
    }
}
