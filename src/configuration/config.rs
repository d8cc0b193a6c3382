use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use super::types::*;
use crate::container_management::Runtime;
use crate::error_handling::types::ConfigError;

impl FixtureConfig {
    /// Loads, completes and validates a configuration file.
    ///
    /// A relative `[build] context` is resolved against the directory holding
    /// the file, then [`ENGINE_ENV_VAR`] is applied.
    ///
    /// # Errors
    /// - `ConfigError::IoError` if the file cannot be read
    /// - `ConfigError::TomlError` if it is not a valid fixture description
    /// - any error of [`FixtureConfig::validate`]
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading fixture configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;

        if let Some(build) = config.build.as_mut() {
            if build.context.is_relative() {
                let base = path.parent().unwrap_or_else(|| Path::new(""));
                build.context = base.join(&build.context);
            }
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration without touching the filesystem or the
    /// environment.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Applies [`ENGINE_ENV_VAR`] if it is set.
    pub fn apply_env(&mut self) {
        self.apply_engine_override(std::env::var(ENGINE_ENV_VAR).ok());
    }

    fn apply_engine_override(&mut self, value: Option<String>) {
        match value.map(|v| v.trim().to_string()) {
            Some(engine) if !engine.is_empty() => {
                debug!("{} overrides engine {} with {}", ENGINE_ENV_VAR, self.engine, engine);
                self.engine = engine;
            }
            Some(_) => warn!("{} is set but empty, ignoring it", ENGINE_ENV_VAR),
            None => {}
        }
    }

    /// Checks that exactly one image source is configured and that a build
    /// context is an existing directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let image = self.image.as_deref().map(str::trim).unwrap_or_default();
        match (&self.build, image.is_empty()) {
            (Some(_), false) => Err(ConfigError::ConflictingImageSource),
            (None, true) => Err(ConfigError::NoImageSource),
            (Some(build), true) => {
                if !build.context.is_dir() {
                    return Err(ConfigError::DirectoryDoesNotExist(
                        build.context.display().to_string(),
                    ));
                }
                Ok(())
            }
            (None, false) => Ok(()),
        }
    }

    pub fn runtime(&self) -> Runtime {
        Runtime::from(self.engine.as_str())
    }
}
