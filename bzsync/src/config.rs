//! Client settings, read once at startup.

use crate::decode::MAX_PAYLOAD_BYTES;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "bzsync.toml";
pub const ENV_PREFIX: &str = "BZSYNC";

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_payload_bytes() -> u64 {
    MAX_PAYLOAD_BYTES
}

#[derive(Clone, Deserialize)]
pub struct Settings {
    pub base_url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

impl Settings {
    pub fn new(base_url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Settings {
            base_url: base_url.into(),
            user: user.into(),
            password: password.into(),
            timeout_secs: default_timeout_secs(),
            max_payload_bytes: default_max_payload_bytes(),
            cache_path: None,
        }
    }

    /// Loads settings from a TOML file overlaid with `BZSYNC_*` environment
    /// variables.
    ///
    /// An explicit `path` must exist; otherwise `bzsync.toml` in the working
    /// directory is read when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };
        Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("cache_path", &self.cache_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn file_values_and_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bzsync.toml");
        fs::write(
            &path,
            "base_url = \"https://bugzilla.example.com\"\nuser = \"user@foobar.com\"\npassword = \"hunter2\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.base_url, "https://bugzilla.example.com");
        assert_eq!(settings.user, "user@foobar.com");
        assert_eq!(settings.timeout(), Duration::from_secs(60));
        assert_eq!(settings.max_payload_bytes, 10 * 1024 * 1024);
        assert_eq!(settings.cache_path, None);
    }

    #[test]
    fn overrides_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            "base_url = \"https://b.example.com/bugzilla\"\ntimeout_secs = 5\ncache_path = \"/tmp/cache.db\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.timeout_secs, 5);
        assert_eq!(settings.cache_path, Some(PathBuf::from("/tmp/cache.db")));
        assert_eq!(settings.password, "");
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn debug_hides_the_password() {
        let settings = Settings::new("https://b.example.com", "me", "hunter2");
        let shown = format!("{:?}", settings);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("<redacted>"));
    }
}
