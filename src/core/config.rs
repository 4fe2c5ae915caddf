use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration for the mqttwatch runtime.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathConfig {
    /// Data root holding the persisted store and secret file.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter directive, e.g. "info" or "mqttwatch=debug".
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields defaults so
    /// the CLI works out of the box.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parse config file {}", path.display()))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("data"))
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join("store.json")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.data_dir().join("secrets.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/mqttwatch.toml")).unwrap();
        assert_eq!(config.store_path(), PathBuf::from("data/store.json"));
        assert!(config.telemetry.log_level.is_none());
    }

    #[test]
    fn test_parse_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mqttwatch.toml");
        fs::write(
            &path,
            "[paths]\ndata_dir = \"/var/lib/mqttwatch\"\n[telemetry]\nlog_level = \"debug\"\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.store_path(),
            PathBuf::from("/var/lib/mqttwatch/store.json")
        );
        assert_eq!(config.telemetry.log_level.as_deref(), Some("debug"));
    }
}
