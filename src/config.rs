//! Bridge Configuration
//!
//! Handles parsing and management of bridge.toml files: which libraries to
//! open, which functions to declare in each, and how calls are run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name searched for by [`BridgeConfig::find_and_load`].
pub const CONFIG_FILE_NAME: &str = "bridge.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching bridge.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    /// Bridge-wide settings
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Libraries to open, in declaration order
    #[serde(default, rename = "library")]
    pub libraries: Vec<LibraryConfig>,
}

impl BridgeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir()?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get a library entry by alias.
    pub fn library(&self, name: &str) -> Option<&LibraryConfig> {
        self.libraries.iter().find(|lib| lib.name == name)
    }
}

/// How declared functions are called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
    /// Call directly on the calling thread
    #[default]
    InProcess,
    /// Call in a forked child and report crashes as errors (unix only)
    Subprocess,
}

/// Bridge-wide settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Call mode for [`Bridge::call`](crate::ffi::Bridge::call)
    #[serde(default)]
    pub isolation: Isolation,

    /// Extra directories searched before the platform defaults
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

/// A library and the functions declared in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Alias used in qualified names (`alias:function`)
    pub name: String,

    /// Path or platform library name; omitted for the process namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// C declarations, e.g. `int printf(const char* format, ...)`
    #[serde(default)]
    pub functions: Vec<String>,
}

impl LibraryConfig {
    /// Create an entry for the process namespace.
    pub fn process(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            functions: Vec::new(),
        }
    }

    /// Create an entry for a library path or name.
    pub fn at(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
            functions: Vec::new(),
        }
    }

    /// Add a C declaration.
    pub fn with_function(mut self, declaration: impl Into<String>) -> Self {
        self.functions.push(declaration.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.bridge.isolation, Isolation::InProcess);
        assert!(config.bridge.search_paths.is_empty());
        assert!(config.libraries.is_empty());
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[bridge]
isolation = "subprocess"
search_paths = ["/opt/native/lib"]

[[library]]
name = "c"
functions = [
    "int printf(const char* format, ...)",
    "size_t strlen(const char* s)",
]

[[library]]
name = "m"
path = "libm.so.6"
functions = ["double cos(double x)"]
"#;
        let config = BridgeConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.bridge.isolation, Isolation::Subprocess);
        assert_eq!(
            config.bridge.search_paths,
            vec![PathBuf::from("/opt/native/lib")]
        );
        assert_eq!(config.libraries.len(), 2);

        let c = config.library("c").unwrap();
        assert!(c.path.is_none());
        assert_eq!(c.functions.len(), 2);

        let m = config.library("m").unwrap();
        assert_eq!(m.path.as_deref(), Some("libm.so.6"));
        assert!(config.library("z").is_none());
    }

    #[test]
    fn test_rejects_unknown_isolation() {
        let err = BridgeConfig::from_toml_str("[bridge]\nisolation = \"threaded\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_save_and_find() {
        let dir = std::env::temp_dir().join(format!("native-bridge-config-{}", std::process::id()));
        let nested = dir.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let mut config = BridgeConfig::default();
        config.libraries.push(
            LibraryConfig::process("c").with_function("size_t strlen(const char* s)"),
        );
        config.save(&dir.join(CONFIG_FILE_NAME)).unwrap();

        let found = BridgeConfig::find_and_load(&nested).unwrap();
        assert_eq!(found.libraries.len(), 1);
        assert_eq!(found.libraries[0].name, "c");
        assert!(found.libraries[0].path.is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let err = BridgeConfig::load(Path::new("/definitely/not/here/bridge.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
