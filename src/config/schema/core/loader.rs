use super::Config;
use crate::error::ConfigError;
use anyhow::{Context, Result};
use directories::UserDirs;
use std::fs;
use std::path::Path;

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let semblance_dir = home.join(".semblance");

        if !semblance_dir.exists() {
            fs::create_dir_all(&semblance_dir).context("Failed to create .semblance directory")?;
        }

        Self::load_or_init_at(&semblance_dir.join("config.toml"))
    }

    /// Load `config_path`, writing a default file first if it does not exist.
    pub fn load_or_init_at(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents =
                fs::read_to_string(config_path).context("Failed to read config file")?;
            let mut config: Config = toml::from_str(&contents).map_err(|e| {
                ConfigError::Load(format!("{}: {e}", config_path.display()))
            })?;
            config.config_path = config_path.to_path_buf();
            config
                .validate()
                .map_err(|e| ConfigError::Validation(format!("{e:#}")))?;
            Ok(config)
        } else {
            let config = Self {
                config_path: config_path.to_path_buf(),
                ..Self::default()
            };
            config.validate()?;
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }
}
