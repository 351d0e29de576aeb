//! FFI Bridge
//!
//! Central registry of opened libraries and declared functions, addressed
//! by qualified names of the form `library:function`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use super::call::call;
use super::error::{FfiError, FfiResult};
use super::isolate::call_isolated;
use super::library::{load, LibraryHandle, LibraryLoader};
use super::signature::{declare_prototype, FunctionSignature};
use super::types::{FfiValue, Prototype};
use crate::config::{BridgeConfig, Isolation};

/// Registry of libraries and declared functions
pub struct Bridge {
    loader: RwLock<LibraryLoader>,
    isolation: Isolation,
    libraries: RwLock<HashMap<String, Arc<LibraryHandle>>>,
    functions: RwLock<HashMap<String, Arc<FunctionSignature>>>,
}

impl Bridge {
    /// Create an empty bridge with default search paths
    pub fn new() -> Self {
        Self {
            loader: RwLock::new(LibraryLoader::new()),
            isolation: Isolation::default(),
            libraries: RwLock::new(HashMap::new()),
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// Create an empty bridge using the isolation mode and search paths in
    /// `config`. No library is opened.
    pub fn with_config(config: &BridgeConfig) -> Self {
        let mut bridge = Self::new();
        bridge.set_isolation(config.bridge.isolation);
        for path in config.bridge.search_paths.iter().rev() {
            bridge.add_search_path(path);
        }
        bridge
    }

    /// Create a bridge and set up every library and function in `config`
    #[instrument(name = "ffi::bridge::from_config", level = "debug", skip_all)]
    pub fn from_config(config: &BridgeConfig) -> FfiResult<Self> {
        let bridge = Self::with_config(config);

        for library in &config.libraries {
            bridge.load_library(&library.name, library.path.as_deref())?;
            for declaration in &library.functions {
                bridge.declare_c(&library.name, declaration)?;
            }
        }

        info!(
            libraries = config.libraries.len(),
            functions = bridge.functions.read().len(),
            "bridge configured"
        );
        Ok(bridge)
    }

    /// Load `bridge.toml` from the current directory or a parent and set up
    /// the bridge from it
    pub fn from_cwd() -> FfiResult<Self> {
        let config = BridgeConfig::load_from_cwd()?;
        Self::from_config(&config)
    }

    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    pub fn set_isolation(&mut self, isolation: Isolation) {
        self.isolation = isolation;
    }

    /// Library search paths in lookup order
    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.loader.read().search_paths().to_vec()
    }

    /// Add a library search path, consulted before the defaults
    pub fn add_search_path(&self, path: impl AsRef<Path>) {
        self.loader.write().add_search_path(path);
    }

    /// Open a library under `alias`.
    ///
    /// `None` opens the process namespace. Loading an alias twice returns
    /// the handle opened first.
    pub fn load_library(&self, alias: &str, path: Option<&str>) -> FfiResult<Arc<LibraryHandle>> {
        if let Some(handle) = self.libraries.read().get(alias) {
            return Ok(Arc::clone(handle));
        }

        let handle = match path {
            Some(path) => self.loader.read().load(path)?,
            None => load(None)?,
        };

        let mut libraries = self.libraries.write();
        let handle = libraries
            .entry(alias.to_string())
            .or_insert(handle)
            .clone();
        debug!(alias, library = %handle.source(), "library registered");
        Ok(handle)
    }

    /// Get a loaded library by alias
    pub fn library(&self, alias: &str) -> Option<Arc<LibraryHandle>> {
        self.libraries.read().get(alias).cloned()
    }

    /// Declare a function in the library loaded under `alias`
    pub fn declare(&self, alias: &str, prototype: Prototype) -> FfiResult<Arc<FunctionSignature>> {
        let handle = self
            .library(alias)
            .ok_or_else(|| FfiError::LibraryNotFound {
                library: alias.to_string(),
                reason: "no library loaded under this name".to_string(),
            })?;

        let signature = Arc::new(declare_prototype(&handle, prototype)?);
        let qualified = format!("{}:{}", alias, signature.name());
        self.functions
            .write()
            .insert(qualified, Arc::clone(&signature));
        Ok(signature)
    }

    /// Declare a function from a C declaration
    pub fn declare_c(&self, alias: &str, declaration: &str) -> FfiResult<Arc<FunctionSignature>> {
        self.declare(alias, Prototype::parse(declaration)?)
    }

    /// Get a declared function by qualified name
    pub fn function(&self, qualified_name: &str) -> Option<Arc<FunctionSignature>> {
        self.functions.read().get(qualified_name).cloned()
    }

    /// Qualified names of all declared functions, sorted
    pub fn functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Aliases of all loaded libraries, sorted
    pub fn libraries(&self) -> Vec<String> {
        let mut names: Vec<String> = self.libraries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Call a function by qualified name (library:function)
    pub fn call(&self, qualified_name: &str, args: &[FfiValue]) -> FfiResult<FfiValue> {
        let signature = self
            .function(qualified_name)
            .ok_or_else(|| FfiError::FunctionNotFound(qualified_name.to_string()))?;

        match self.isolation {
            Isolation::InProcess => call(&signature, args),
            Isolation::Subprocess => call_isolated(&signature, args),
        }
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}
