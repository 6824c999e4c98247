//! Configuration file loading
//!
//! Handles loading and parsing configuration files using the config crate.
//! Values from `JAVARENA_*` environment variables override file values, with
//! `__` separating nested keys (`JAVARENA_SESSION__GRACE_PERIOD_SECS=3`).

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError};

const ENV_PREFIX: &str = "JAVARENA";

impl Config {
    /// Load configuration from a file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .add_source(environment())
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load the built-in defaults with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(environment())
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.toolchain.compiler.trim().is_empty() {
            return Err(ConfigError::Invalid("toolchain.compiler is empty".into()));
        }
        if self.toolchain.runtime.trim().is_empty() {
            return Err(ConfigError::Invalid("toolchain.runtime is empty".into()));
        }
        if self.session.grace_period_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.grace_period_secs must be positive".into(),
            ));
        }
        if self.session.event_buffer == 0 || self.session.read_buffer == 0 {
            return Err(ConfigError::Invalid(
                "session buffers must be positive".into(),
            ));
        }
        if self.batch.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "batch.timeout_secs must be positive".into(),
            ));
        }
        if self.compile.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "compile.timeout_secs must be positive".into(),
            ));
        }
        if self.workspace.fallback_entry.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "workspace.fallback_entry is empty".into(),
            ));
        }

        Ok(())
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
