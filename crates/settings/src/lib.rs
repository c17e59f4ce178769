//! Dropwell Settings
//!
//! Generic config file management for Dropwell services, platform-aware data
//! and config directories, and the crash-safe [`write_atomic`] every durable
//! record goes through.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(String),
    #[error("Failed to write settings: {0}")]
    WriteError(String),
    #[error("Failed to parse settings: {0}")]
    ParseError(String),
    #[error("Failed to create directory: {0}")]
    CreateDirError(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Generic settings wrapper for any serializable config type.
///
/// ```ignore
/// let settings: Settings<DaemonConfig> = Settings::load_or_default("dropwell", None)?;
/// ```
pub struct Settings<T> {
    pub config: T,
    path: PathBuf,
}

impl<T: Serialize + DeserializeOwned + Default> Settings<T> {
    /// Load settings from the default path for a service, or create defaults.
    pub fn load_or_default(service: &str, custom_path: Option<&Path>) -> Result<Self> {
        let path = match custom_path {
            Some(p) => p.to_path_buf(),
            None => default_settings_path(service),
        };

        if path.exists() {
            debug!("Loading settings from {}", path.display());
            let content = fs::read_to_string(&path)
                .map_err(|e| SettingsError::ReadError(e.to_string()))?;
            let config: T = serde_json::from_str(&content)
                .map_err(|e| SettingsError::ParseError(e.to_string()))?;
            Ok(Self { config, path })
        } else {
            debug!("Creating default settings at {}", path.display());
            let settings = Self {
                config: T::default(),
                path,
            };
            settings.save()?;
            Ok(settings)
        }
    }

    /// Save current settings to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SettingsError::CreateDirError(e.to_string()))?;
        }
        let content = serde_json::to_vec_pretty(&self.config)
            .map_err(|e| SettingsError::WriteError(e.to_string()))?;
        write_atomic(&self.path, &content).map_err(|e| SettingsError::WriteError(e.to_string()))
    }

    /// Get the path where settings are stored.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `data` to `path` so that readers see either the old content or the
/// new content, never a partial file.
///
/// Writes a sibling temp file, fsyncs it, renames it over `path`, then fsyncs
/// the directory so the rename itself survives a crash.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result?;

    #[cfg(unix)]
    {
        if let Ok(dir) = fs::File::open(&parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Whether a directory entry is a leftover [`write_atomic`] temp file.
pub fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

/// Get the default settings file path for a service.
pub fn default_settings_path(service: &str) -> PathBuf {
    default_config_dir_for(service).join("settings.json")
}

/// Get the default config directory for a given service name.
///
/// - macOS: `~/Library/Application Support/{ServiceName}`
/// - Linux: `~/.config/{service_name}`
/// - Windows: `%APPDATA%\{ServiceName}`
pub fn default_config_dir_for(service: &str) -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        home_dir().join("Library").join("Application Support").join(capitalize(service))
    }
    #[cfg(target_os = "linux")]
    {
        let xdg = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".config"));
        xdg.join(service.to_lowercase())
    }
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join("AppData").join("Roaming"));
        appdata.join(capitalize(service))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        home_dir().join(format!(".{}", service.to_lowercase()))
    }
}

/// Get the default data directory for a given service name.
pub fn data_dir(service: &str) -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        home_dir().join("Library").join("Application Support").join(capitalize(service))
    }
    #[cfg(target_os = "linux")]
    {
        let xdg = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".local").join("share"));
        xdg.join(service.to_lowercase())
    }
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join("AppData").join("Roaming"));
        appdata.join(capitalize(service))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        home_dir().join(format!(".{}", service.to_lowercase()))
    }
}

/// Expand `~` in paths to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if path == "~" => home_dir(),
        None => PathBuf::from(path),
    }
}

fn home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

#[allow(dead_code)]
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(c) => c.to_uppercase().to_string() + &chars.as_str().to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
    struct TestConfig {
        name: String,
        value: u32,
    }

    #[test]
    fn test_settings_load_or_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test-settings.json");

        // Create default
        let settings: Settings<TestConfig> =
            Settings::load_or_default("test", Some(&path)).unwrap();
        assert_eq!(settings.config, TestConfig::default());
        assert!(path.exists());

        // Load existing
        let settings2: Settings<TestConfig> =
            Settings::load_or_default("test", Some(&path)).unwrap();
        assert_eq!(settings2.config, TestConfig::default());
    }

    #[test]
    fn test_settings_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut settings: Settings<TestConfig> =
            Settings::load_or_default("test", Some(&path)).unwrap();
        settings.config.name = "modified".to_string();
        settings.config.value = 42;
        settings.save().unwrap();

        let loaded: Settings<TestConfig> =
            Settings::load_or_default("test", Some(&path)).unwrap();
        assert_eq!(loaded.config.name, "modified");
        assert_eq!(loaded.config.value, 42);
    }

    #[test]
    fn test_settings_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let result: Result<Settings<TestConfig>> = Settings::load_or_default("test", Some(&path));
        assert!(matches!(result, Err(SettingsError::ParseError(_))));
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["record.json".to_string()]);
    }

    #[test]
    fn test_is_temp_file() {
        assert!(is_temp_file(".abc.json.12.0.tmp"));
        assert!(!is_temp_file("abc.json"));
    }

    #[test]
    fn test_default_paths() {
        let config_dir = default_config_dir_for("dropwell");
        assert!(!config_dir.to_string_lossy().is_empty());
        assert!(default_settings_path("dropwell")
            .to_string_lossy()
            .ends_with("settings.json"));
    }

    #[test]
    fn test_expand_path() {
        let expanded = expand_path("~/test");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_path("/abs/path"), PathBuf::from("/abs/path"));
    }
}
