use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::LibraryError;

pub const CONFIG_VERSION: u32 = 2;

pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "opus", "m4a", "aac", "wav", "aiff", "aif", "wv", "ape",
];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub version: u32,
    pub library_paths: Vec<String>,
    pub index_path: String,
    pub extensions: Vec<String>,
    pub include_hidden: bool,
    pub follow_links: bool,
    /// 0 leaves extraction fan-out unbounded.
    pub max_concurrent_extractions: usize,
    pub watch_library: bool,
    pub watch_debounce_secs: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            library_paths: Vec::new(),
            index_path: "library.redb".to_string(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            include_hidden: false,
            follow_links: false,
            max_concurrent_extractions: 0,
            watch_library: true,
            watch_debounce_secs: 2,
        }
    }
}

impl LibraryConfig {
    /// Scan settings with library paths resolved against the config file.
    pub fn scan_settings(&self, config_path: &Path) -> ScanSettings {
        let library_paths = self
            .library_paths
            .iter()
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(|value| resolve_path(config_path, value).to_string_lossy().to_string())
            .collect();
        ScanSettings {
            library_paths,
            extensions: self.extensions.clone(),
            include_hidden: self.include_hidden,
            follow_links: self.follow_links,
            max_concurrent_extractions: self.max_concurrent_extractions,
        }
    }
}

/// What one scan pass needs to know about the user's library.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanSettings {
    pub library_paths: BTreeSet<String>,
    pub extensions: Vec<String>,
    pub include_hidden: bool,
    pub follow_links: bool,
    pub max_concurrent_extractions: usize,
}

impl ScanSettings {
    pub fn new<I, S>(library_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let defaults = LibraryConfig::default();
        Self {
            library_paths: library_paths.into_iter().map(Into::into).collect(),
            extensions: defaults.extensions,
            include_hidden: defaults.include_hidden,
            follow_links: defaults.follow_links,
            max_concurrent_extractions: defaults.max_concurrent_extractions,
        }
    }
}

pub trait SettingsProvider: Send + Sync {
    fn scan_settings(&self) -> Result<ScanSettings, LibraryError>;
}

impl SettingsProvider for ScanSettings {
    fn scan_settings(&self) -> Result<ScanSettings, LibraryError> {
        Ok(self.clone())
    }
}

/// Settings read from the YAML config file on every call, so edits take
/// effect on the next scan.
#[derive(Clone, Debug)]
pub struct YamlSettings {
    path: PathBuf,
}

impl YamlSettings {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsProvider for YamlSettings {
    fn scan_settings(&self) -> Result<ScanSettings, LibraryError> {
        let config = read_config(&self.path)?;
        Ok(config.scan_settings(&self.path))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("MELODIFY_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn read_config(path: &Path) -> Result<LibraryConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let mut config: LibraryConfig = serde_yaml::from_str(&contents)?;
    if config.version < CONFIG_VERSION {
        config.version = CONFIG_VERSION;
    }
    if config.index_path.trim().is_empty() {
        config.index_path = "library.redb".to_string();
    }
    config.extensions = config
        .extensions
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();
    if config.extensions.is_empty() {
        config.extensions = LibraryConfig::default().extensions;
    }
    if config.watch_debounce_secs == 0 {
        config.watch_debounce_secs = 2;
    }
    Ok(config)
}

pub fn load_or_create_config(path: &Path) -> Result<(LibraryConfig, bool), ConfigError> {
    if path.exists() {
        return Ok((read_config(path)?, false));
    }

    let config = LibraryConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &LibraryConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert!(path.exists());
        assert_eq!(config.max_concurrent_extractions, 0);

        let (reloaded, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(reloaded.extensions, config.extensions);
    }

    #[test]
    fn partial_config_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "version: 1\nlibrary_paths: [music]\nindex_path: ''\nextensions: ['.MP3', ' ']\n",
        )
        .unwrap();

        let config = read_config(&path).unwrap();
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.index_path, "library.redb");
        assert_eq!(config.extensions, vec!["mp3".to_string()]);

        let settings = YamlSettings::new(path.clone()).scan_settings().unwrap();
        let expected = dir.path().join("music").to_string_lossy().to_string();
        assert!(settings.library_paths.contains(&expected));
    }

    #[test]
    fn invalid_yaml_surfaces_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "library_paths: [unterminated").unwrap();
        assert!(YamlSettings::new(path).scan_settings().is_err());
    }
}
