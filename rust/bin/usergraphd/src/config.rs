//! Server configuration.
//!
//! ```toml
//! [storage]
//! data_dir = "/var/lib/usergraph"
//!
//! [notifications]
//! url = "http://notifications.internal:8080/notifications"
//! timeout_secs = 5
//! poll_interval_secs = 5
//! batch_size = 50
//! max_attempts = 5
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Directory searched for context names.
const CONTEXT_DIR: &str = "/etc/usergraph";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the SQLite database.
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Notification service endpoint. Empty means notifications are only logged.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_batch_size() -> u32 {
    50
}

fn default_max_attempts() -> u32 {
    5
}

impl ServerConfig {
    /// Resolve `-c` into a file path. A bare name such as `prod` maps to
    /// `/etc/usergraph/prod.toml`; anything containing `/` or `.` is used as is.
    pub fn resolve_path(context: &str) -> PathBuf {
        if context.contains('/') || context.contains('.') {
            PathBuf::from(context)
        } else {
            Path::new(CONTEXT_DIR).join(format!("{context}.toml"))
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: ServerConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Reject configurations the server cannot start with.
    pub fn verify(&self) -> anyhow::Result<()> {
        if self.storage.data_dir.trim().is_empty() {
            anyhow::bail!("Storage data_dir is empty in configuration.");
        }
        let n = &self.notifications;
        if !n.url.is_empty() && !(n.url.starts_with("http://") || n.url.starts_with("https://")) {
            anyhow::bail!("notifications.url must be an http(s) URL, got {:?}", n.url);
        }
        if n.batch_size == 0 {
            anyhow::bail!("notifications.batch_size must be at least 1");
        }
        if n.max_attempts == 0 {
            anyhow::bail!("notifications.max_attempts must be at least 1");
        }
        if n.timeout_secs == 0 {
            anyhow::bail!("notifications.timeout_secs must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_context_names() {
        assert_eq!(
            ServerConfig::resolve_path("prod"),
            PathBuf::from("/etc/usergraph/prod.toml")
        );
        assert_eq!(
            ServerConfig::resolve_path("./local.toml"),
            PathBuf::from("./local.toml")
        );
        assert_eq!(
            ServerConfig::resolve_path("/tmp/x.toml"),
            PathBuf::from("/tmp/x.toml")
        );
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = ServerConfig::parse("[storage]\ndata_dir = \"/tmp/ug\"\n").unwrap();
        assert_eq!(config.storage.data_dir, "/tmp/ug");
        assert!(config.notifications.url.is_empty());
        assert_eq!(config.notifications.batch_size, 50);
        assert_eq!(config.notifications.max_attempts, 5);
        config.verify().unwrap();
    }

    #[test]
    fn full_config() {
        let config = ServerConfig::parse(
            r#"
            [storage]
            data_dir = "/var/lib/usergraph"

            [notifications]
            url = "http://notify:8080/notifications"
            timeout_secs = 2
            poll_interval_secs = 1
            batch_size = 10
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.notifications.url, "http://notify:8080/notifications");
        assert_eq!(config.notifications.poll_interval_secs, 1);
        config.verify().unwrap();
    }

    #[test]
    fn verify_rejects_bad_values() {
        let mut config = ServerConfig::parse("[storage]\ndata_dir = \"\"\n").unwrap();
        assert!(config.verify().is_err());

        config.storage.data_dir = "/tmp/ug".into();
        config.notifications.url = "amqp://broker".into();
        assert!(config.verify().is_err());

        config.notifications.url.clear();
        config.notifications.batch_size = 0;
        assert!(config.verify().is_err());
    }

    #[test]
    fn missing_storage_section_fails() {
        assert!(ServerConfig::parse("[notifications]\nurl = \"\"\n").is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev.toml");
        std::fs::write(&path, "[storage]\ndata_dir = \"/tmp/dev\"\n").unwrap();
        assert_eq!(ServerConfig::load(&path).unwrap().storage.data_dir, "/tmp/dev");
        assert!(ServerConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
