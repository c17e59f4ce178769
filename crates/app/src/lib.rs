//! Dropwell App
//!
//! Unified initialization for Dropwell binaries: logging + settings + data directory.

use std::path::{Path, PathBuf};

use dropwell_logging::{LogFormat, LogLevel};
use dropwell_settings::{Settings, SettingsError};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Initialization failed: {0}")]
    InitError(String),
    #[error("Settings error: {0}")]
    SettingsError(#[from] SettingsError),
}

/// Application type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppType {
    Cli,
    Daemon,
}

impl AppType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cli => "CLI",
            Self::Daemon => "Daemon",
        }
    }
}

/// Initialized application context
pub struct App<T> {
    pub service: String,
    pub app_type: AppType,
    pub settings: Settings<T>,
    /// Root for durable state such as session records.
    pub data_dir: PathBuf,
}

/// Builder for constructing an App with configurable options.
pub struct AppBuilder<T> {
    service: String,
    app_type: AppType,
    log_level: LogLevel,
    log_format: LogFormat,
    skip_logging: bool,
    skip_banner: bool,
    config_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned + Default> AppBuilder<T> {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            app_type: AppType::Cli,
            log_level: LogLevel::Info,
            log_format: LogFormat::Pretty,
            skip_logging: false,
            skip_banner: false,
            config_path: None,
            data_dir: None,
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn app_type(mut self, app_type: AppType) -> Self {
        self.app_type = app_type;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.log_level = LogLevel::from_verbose(verbose);
        self
    }

    pub fn skip_logging(mut self) -> Self {
        self.skip_logging = true;
        self
    }

    pub fn skip_banner(mut self) -> Self {
        self.skip_banner = true;
        self
    }

    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn data_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.data_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn build(self) -> Result<App<T>, AppError> {
        // Initialize logging
        if !self.skip_logging {
            let _ = dropwell_logging::try_init_with(self.log_level, self.log_format);
        }

        // Load or create settings
        let settings = Settings::load_or_default(&self.service, self.config_path.as_deref())?;

        let data_dir = self
            .data_dir
            .unwrap_or_else(|| dropwell_settings::data_dir(&self.service));
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            AppError::InitError(format!("cannot create {}: {}", data_dir.display(), e))
        })?;

        if !self.skip_banner {
            info!(
                "{} {} ({}) starting, settings: {}, data: {}",
                self.service,
                env!("CARGO_PKG_VERSION"),
                self.app_type.name(),
                settings.path().display(),
                data_dir.display(),
            );
        }

        Ok(App {
            service: self.service,
            app_type: self.app_type,
            settings,
            data_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, Default)]
    struct TestConfig {
        value: u32,
    }

    #[test]
    fn test_app_type_name() {
        assert_eq!(AppType::Cli.name(), "CLI");
        assert_eq!(AppType::Daemon.name(), "Daemon");
    }

    #[test]
    fn test_app_builder() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("settings.json");
        let data_dir = dir.path().join("data");

        let app: App<TestConfig> = AppBuilder::new("dropwell-app-test")
            .app_type(AppType::Daemon)
            .skip_logging()
            .skip_banner()
            .config_path(&config_path)
            .data_dir(&data_dir)
            .build()
            .unwrap();

        assert_eq!(app.service, "dropwell-app-test");
        assert_eq!(app.app_type, AppType::Daemon);
        assert_eq!(app.settings.config.value, 0);
        assert!(config_path.exists());
        assert!(data_dir.is_dir());
    }
}
