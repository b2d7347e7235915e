//! Configuration loader using figment.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic merges ([`ConfigLoader::merge`])
//! 3. Profile-specific file (`chorus.{profile}.toml` / `chorus.{profile}.yaml`)
//! 4. Main file (`chorus.toml` / `chorus.yaml`)
//! 5. Environment variables (`CHORUS_*`)
//!
//! Formats follow the `toml-config` *(default)* and `yaml-config` features.
//! Files are searched in the current directory and in
//! `<user config dir>/chorus` unless search paths are given.
//!
//! # Environment Variable Mapping
//!
//! `CHORUS_` prefix, `__` between path segments:
//!
//! - `CHORUS_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `CHORUS_RESILIENCE__TIMEOUT_MS=5000` → `resilience.timeout_ms = 5000`
//! - `CHORUS_PLATFORMS__LOOPBACK__ENABLED=false` → `platforms.loopback.enabled = false`
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::ChorusConfig;
use super::validation::validate_config;

const ENV_PREFIX: &str = "CHORUS_";
const PROFILE_VAR: &str = "CHORUS_PROFILE";
const FILE_STEM: &str = "chorus";

/// Configuration profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name, accepting the short aliases `dev` and `prod`.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `CHORUS_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-source configuration loader.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Explicit file; disables the search.
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a directory to search. Once any path is added the default
    /// locations are no longer searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join(FILE_STEM)),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching. Missing is an error.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a configuration value above the built-in defaults.
    pub fn merge(mut self, config: ChorusConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads, extracts and validates the configuration.
    pub fn load(self) -> ConfigResult<ChorusConfig> {
        let profile = self.profile.clone();
        let config: ChorusConfig = self.build_figment()?.extract()?;
        validate_config(&config)?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            platforms = config.platforms.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let user = std::mem::take(&mut self.figment);
        let mut figment = Figment::from(Serialized::defaults(ChorusConfig::default())).merge(user);

        match self.config_file.take() {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration file");
                figment = merge_file(figment, &path)?;
            }
            Some(path) => return Err(ConfigError::FileNotFound(path)),
            None => figment = self.search_files(figment),
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment)
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|d| d.join(FILE_STEM)))
            .collect()
    }

    /// Merges the profile file and then the main file from the first
    /// directory that has a main file.
    fn search_files(&self, mut figment: Figment) -> Figment {
        let extensions = supported_extensions();
        for dir in self.resolve_search_paths() {
            for ext in extensions {
                let main = dir.join(format!("{FILE_STEM}.{ext}"));
                if !main.exists() {
                    continue;
                }

                let profiled = dir.join(format!("{FILE_STEM}.{}.{ext}", self.profile));
                if profiled.exists() {
                    debug!(path = %profiled.display(), "Loading profile-specific config");
                    figment = merge_file(figment.clone(), &profiled).unwrap_or(figment);
                }

                info!(path = %main.display(), "Loading configuration file");
                return merge_file(figment.clone(), &main).unwrap_or(figment);
            }
        }

        warn!("No configuration file found, using defaults");
        figment
    }
}

fn supported_extensions() -> &'static [&'static str] {
    #[cfg(all(feature = "toml-config", feature = "yaml-config"))]
    {
        &["toml", "yaml", "yml"]
    }
    #[cfg(all(feature = "toml-config", not(feature = "yaml-config")))]
    {
        &["toml"]
    }
    #[cfg(all(feature = "yaml-config", not(feature = "toml-config")))]
    {
        &["yaml", "yml"]
    }
    #[cfg(not(any(feature = "toml-config", feature = "yaml-config")))]
    {
        &[]
    }
}

/// Merges one file, dispatching on its extension.
fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        #[cfg(feature = "toml-config")]
        "toml" => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        _ => Err(ConfigError::ParseError(format!(
            "Unsupported or disabled configuration file format: .{ext}"
        ))),
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<ChorusConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from `path` plus environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<ChorusConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use figment::Jail;

    #[test]
    fn test_defaults_without_files() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.logging.level, LogLevel::Info);
            assert!(config.platforms.is_empty());
            assert!(config.resilience.retry.is_some());
            Ok(())
        });
    }

    #[test]
    fn test_file_profile_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "chorus.toml",
                r#"
                [logging]
                level = "warn"

                [resilience]
                timeout_ms = 1000

                [platforms.loopback]
                settings = { self_id = "main" }
                "#,
            )?;
            jail.create_file(
                "chorus.production.toml",
                r#"
                [resilience]
                timeout_ms = 9000
                rate_limit = { concurrency = 2, rate = 4.0 }
                "#,
            )?;
            jail.set_env("CHORUS_LOGGING__LEVEL", "debug");
            jail.set_env("CHORUS_PLATFORMS__LOOPBACK__ENABLED", "false");

            let config = ConfigLoader::new()
                .profile("prod")
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.logging.level, LogLevel::Debug);
            // main file wins over the profile file
            assert_eq!(config.resilience.timeout_ms, Some(1000));
            assert_eq!(config.resilience.rate_limit.unwrap().concurrency, 2);
            let loopback = &config.platforms["loopback"];
            assert!(!loopback.enabled);
            assert_eq!(loopback.settings["self_id"], "main");
            Ok(())
        });
    }

    #[test]
    fn test_explicit_missing_file() {
        Jail::expect_with(|jail| {
            let result = ConfigLoader::new()
                .file(jail.directory().join("nope.toml"))
                .load();
            assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_rejected_on_load() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "chorus.toml",
                r#"
                [resilience]
                rate_limit = { concurrency = 0, rate = 1.0 }
                "#,
            )?;
            let result = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load();
            assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
            Ok(())
        });
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(Profile::parse("PROD"), Profile::Production);
        assert_eq!(Profile::parse("dev"), Profile::Development);
        assert_eq!(Profile::parse("staging").as_str(), "staging");
    }
}
