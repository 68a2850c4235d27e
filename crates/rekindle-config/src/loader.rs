use std::path::{Path, PathBuf};

use rekindle_common::{Error, Result};
use tracing::info;

use crate::model::AppConfig;

pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Result<Self> {
        let config_dir = Self::default_config_dir();
        Ok(Self { config_dir })
    }

    pub fn default_config_dir() -> PathBuf {
        let home_config = dirs::home_dir().map(|h| h.join(".rekindle"));
        let xdg_config = dirs::config_dir().map(|c| c.join("rekindle"));

        match (xdg_config, home_config) {
            (Some(xdg), Some(home)) => {
                if xdg.exists() {
                    xdg
                } else if home.exists() {
                    home
                } else {
                    xdg
                }
            }
            (Some(xdg), None) => xdg,
            (None, Some(home)) => home,
            (None, None) => PathBuf::from(".rekindle"),
        }
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Returns true if a config file (YAML or TOML) exists on disk.
    pub fn config_file_exists(&self) -> bool {
        self.config_dir.join("config.yml").exists() || self.config_dir.join("config.toml").exists()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let yaml_path = self.config_dir.join("config.yml");
        let toml_path = self.config_dir.join("config.toml");

        let mut config = if yaml_path.exists() {
            info!("loading config from {}", yaml_path.display());
            let contents = std::fs::read_to_string(&yaml_path)?;
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse YAML config: {e}")))?
        } else if toml_path.exists() {
            info!("loading config from {}", toml_path.display());
            let contents = std::fs::read_to_string(&toml_path)?;
            toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse TOML config: {e}")))?
        } else {
            info!("no config file found, using defaults");
            AppConfig::default()
        };

        config.llm.apply_env_overrides();
        Ok(config)
    }

    /// Resolve the SQLite database path, preferring an explicit `data_dir`.
    pub fn database_path(&self, config: &AppConfig) -> PathBuf {
        config
            .data_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("data"))
            .join("rekindle.db")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let dirs = [self.config_dir.clone(), self.config_dir.join("data")];

        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }

        Ok(())
    }
}
