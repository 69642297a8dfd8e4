//! Bot configuration: a TOML file plus environment overrides for secrets.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use portal::settings::{DEFAULT_NEW_MESSAGE_COOLDOWN_MS, DEFAULT_NEW_USER_COOLDOWN_MS};
use portal::{PortalSettings, RenderError, TemplateSet, DEFAULT_LOCK_CAPACITY};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use toml_edit::DocumentMut;

/// Env var naming the config file.
pub const CONFIG_PATH_VAR: &str = "SUPPORT_PORTAL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";
const DEFAULT_SQLITE_PATH: &str = "portal.db";
const DEFAULT_SYNC_TIMEOUT_MS: u64 = 30_000;
/// Device IDs only matter for encryption, which the bot does not use.
const DEFAULT_DEVICE_ID: &str = "SUPPORTPORTAL";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to edit config: {0}")]
    Edit(#[from] toml_edit::TomlError),

    #[error("invalid template: {0}")]
    Template(#[from] RenderError),

    #[error("{0} is required (set it in the config file or environment)")]
    Missing(&'static str),

    #[error("config watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// Everything the bot reads from `config.toml`.
///
/// | Key | Env override | Default |
/// |-----|--------------|---------|
/// | `homeserver` | `MATRIX_HOMESERVER` | (required) |
/// | `user_id` | `MATRIX_USER_ID` | (required) |
/// | `device_id` | `MATRIX_DEVICE_ID` | `SUPPORTPORTAL` |
/// | `access_token` | `MATRIX_ACCESS_TOKEN` | (required) |
/// | `sqlite_path` | `SQLITE_PATH` | `portal.db` |
/// | `control_room` | | unset, first invite registers one |
/// | `template_prepend` | | empty |
/// | `[templates]` | | built-in templates |
/// | `new_user_cooldown_ms` | | 300000 |
/// | `new_message_cooldown_ms` | | 60000 |
/// | `lock_capacity` | | 10000 |
/// | `sync_timeout_ms` | | 30000 |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub homeserver: String,
    pub user_id: String,
    pub device_id: String,
    pub access_token: String,
    pub sqlite_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_room: Option<String>,
    pub template_prepend: String,
    pub templates: HashMap<String, String>,
    pub new_user_cooldown_ms: i64,
    pub new_message_cooldown_ms: i64,
    pub lock_capacity: usize,
    pub sync_timeout_ms: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            homeserver: String::new(),
            user_id: String::new(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            access_token: String::new(),
            sqlite_path: DEFAULT_SQLITE_PATH.to_string(),
            control_room: None,
            template_prepend: String::new(),
            templates: HashMap::new(),
            new_user_cooldown_ms: DEFAULT_NEW_USER_COOLDOWN_MS,
            new_message_cooldown_ms: DEFAULT_NEW_MESSAGE_COOLDOWN_MS,
            lock_capacity: DEFAULT_LOCK_CAPACITY,
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
        }
    }
}

impl BotConfig {
    /// Path of the config file, from `SUPPORT_PORTAL_CONFIG`.
    pub fn path_from_env() -> PathBuf {
        env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Read the config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(source) => Self::from_toml_str(&source),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Load the file, apply environment overrides and check required keys.
    pub fn from_file_and_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override secrets from `lookup` (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(homeserver) = lookup("MATRIX_HOMESERVER") {
            self.homeserver = homeserver;
        }
        if let Some(user_id) = lookup("MATRIX_USER_ID") {
            self.user_id = user_id;
        }
        if let Some(device_id) = lookup("MATRIX_DEVICE_ID") {
            self.device_id = device_id;
        }
        if let Some(token) = lookup("MATRIX_ACCESS_TOKEN") {
            self.access_token = token;
        }
        if let Some(path) = lookup("SQLITE_PATH") {
            self.sqlite_path = path;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.homeserver.trim().is_empty() {
            return Err(ConfigError::Missing("homeserver"));
        }
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::Missing("user_id"));
        }
        if self.device_id.trim().is_empty() {
            return Err(ConfigError::Missing("device_id"));
        }
        if self.access_token.trim().is_empty() {
            return Err(ConfigError::Missing("access_token"));
        }
        Ok(())
    }

    pub fn database_url(&self) -> String {
        database::sqlite_url_from_path(&self.sqlite_path)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// The hot-reloadable part of the config. Fails if a template does not
    /// compile.
    pub fn settings(&self) -> Result<PortalSettings, ConfigError> {
        Ok(PortalSettings {
            control_room: self.control_room.clone().filter(|room| !room.is_empty()),
            templates: TemplateSet::new(self.template_prepend.clone(), self.templates.clone())?,
            new_user_cooldown_ms: self.new_user_cooldown_ms,
            new_message_cooldown_ms: self.new_message_cooldown_ms,
        })
    }
}

/// Write `control_room` into the config file. Comments, key order and every
/// other key are left as the operator wrote them.
///
/// Secrets taken from the environment are never written back.
pub fn save_control_room(path: &Path, room_id: &str) -> Result<(), ConfigError> {
    let mut doc = match std::fs::read_to_string(path) {
        Ok(source) => source.parse::<DocumentMut>()?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DocumentMut::new(),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    doc["control_room"] = toml_edit::value(room_id);

    std::fs::write(path, doc.to_string()).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), room_id, "Saved control room to config");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = BotConfig::from_toml_str("").unwrap();
        assert_eq!(config, BotConfig::default());
        assert_eq!(config.database_url(), "sqlite:portal.db?mode=rwc");
        assert!(config.settings().unwrap().control_room.is_none());
    }

    #[test]
    fn test_parse_full_file() {
        let config = BotConfig::from_toml_str(
            r#"
            homeserver = "https://matrix.example.org"
            user_id = "@portal:example.org"
            access_token = "secret"
            sqlite_path = "sqlite::memory:"
            control_room = "!control:example.org"
            template_prepend = "> "
            new_user_cooldown_ms = 1000
            new_message_cooldown_ms = 2000
            lock_capacity = 16
            sync_timeout_ms = 5000

            [templates]
            welcome = "hi {{ case.displayname }}"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.database_url(), "sqlite::memory:");
        assert_eq!(config.sync_timeout(), Duration::from_millis(5000));
        assert_eq!(config.lock_capacity, 16);

        let settings = config.settings().unwrap();
        assert_eq!(settings.control_room.as_deref(), Some("!control:example.org"));
        assert_eq!(settings.new_user_cooldown_ms, 1000);
        assert_eq!(settings.new_message_cooldown_ms, 2000);
        assert_eq!(settings.templates.prepend(), "> ");
        // Templates not overridden keep their defaults
        assert_eq!(settings.templates.names().len(), 8);
    }

    #[test]
    fn test_overrides_and_validation() {
        let mut config = BotConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("homeserver"))
        ));

        config.apply_overrides(|key| match key {
            "MATRIX_HOMESERVER" => Some("https://hs.example.org".to_string()),
            "SQLITE_PATH" => Some("data/portal.db".to_string()),
            _ => None,
        });
        assert_eq!(config.homeserver, "https://hs.example.org");
        assert_eq!(config.database_url(), "sqlite:data/portal.db?mode=rwc");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("user_id"))
        ));

        config.apply_overrides(|key| match key {
            "MATRIX_USER_ID" => Some("@portal:hs.example.org".to_string()),
            "MATRIX_DEVICE_ID" => Some("ABCDEF".to_string()),
            _ => None,
        });
        assert_eq!(config.device_id, "ABCDEF");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("access_token"))
        ));
    }

    #[test]
    fn test_invalid_toml() {
        let err = BotConfig::from_toml_str("lock_capacity = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BotConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, BotConfig::default());
    }

    #[test]
    fn test_broken_template_fails_settings() {
        let config = BotConfig::from_toml_str("[templates]\nwelcome = \"{% for %}\"\n").unwrap();
        assert!(matches!(config.settings(), Err(ConfigError::Template(_))));
    }

    #[test]
    fn test_save_control_room_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let original = "# Support portal\n\
            homeserver = \"https://hs.example.org\" # main server\n\
            \n\
            [templates]\n\
            # shown to new users\n\
            welcome = \"hello\"\n";
        std::fs::write(&path, original).unwrap();

        save_control_room(&path, "!control:example.org").unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("# Support portal\n"));
        assert!(written.contains("homeserver = \"https://hs.example.org\" # main server"));
        assert!(written.contains("# shown to new users\nwelcome = \"hello\""));
        assert!(written.contains("control_room = \"!control:example.org\""));

        let config = BotConfig::load(&path).unwrap();
        assert_eq!(config.control_room.as_deref(), Some("!control:example.org"));
        assert_eq!(config.homeserver, "https://hs.example.org");
        assert_eq!(config.templates.get("welcome").map(String::as_str), Some("hello"));
        assert!(config.access_token.is_empty());
    }
}
