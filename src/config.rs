use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collaborators::listener::{DATA_CHANNEL, FEEDBACK_CHANNEL};
use crate::filter::UnknownOperatorPolicy;
use crate::schema::MappedTable;
use crate::storage::StoreOptions;

pub const ENV_DATABASE: &str = "CONNECTOR_DATABASE";
pub const ENV_DATA_CHANNEL: &str = "CONNECTOR_DATA_CHANNEL";
pub const ENV_FEEDBACK_CHANNEL: &str = "CONNECTOR_FEEDBACK_CHANNEL";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectorConfig {
    pub database: Option<String>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    /// Customer conversation table read through a column mapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_table: Option<MappedTableConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_size: u32,
    pub acquire_timeout_secs: u64,
    pub busy_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout_secs: 30,
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FilterConfig {
    pub unknown_operator: UnknownOperatorPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub channels: Vec<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            channels: vec![DATA_CHANNEL.to_string(), FEEDBACK_CHANNEL.to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappedTableConfig {
    pub table: String,
    /// Logical field → physical column
    pub columns: BTreeMap<String, String>,
}

impl MappedTableConfig {
    pub fn build(&self) -> crate::Result<MappedTable> {
        MappedTable::new(self.table.clone(), self.columns.iter().map(|(f, c)| (f, c.clone())))
    }
}

impl ConnectorConfig {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_connections: self.pool.max_size,
            acquire_timeout: Duration::from_secs(self.pool.acquire_timeout_secs),
            busy_timeout: Duration::from_millis(self.pool.busy_timeout_ms),
            unknown_operator: self.filter.unknown_operator,
        }
    }

    /// Apply `CONNECTOR_*` environment overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db) = lookup(ENV_DATABASE) {
            self.database = Some(db);
        }
        let renames = [(DATA_CHANNEL, ENV_DATA_CHANNEL), (FEEDBACK_CHANNEL, ENV_FEEDBACK_CHANNEL)];
        for (default, var) in renames {
            if let Some(name) = lookup(var) {
                for channel in self.listener.channels.iter_mut().filter(|c| c.as_str() == default) {
                    *channel = name.clone();
                }
            }
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(default_database_path)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("connector.toml")
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from(".connector").join("connector.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<ConnectorConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: ConnectorConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &ConnectorConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.toml"))).unwrap().is_none());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connector.toml");
        std::fs::write(
            &path,
            "database = \"data/app.db\"\n\n[pool]\nmax_size = 4\n\n[filter]\nunknown_operator = \"ignore\"\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(config.database_path(), PathBuf::from("data/app.db"));
        assert_eq!(config.pool.max_size, 4);
        assert_eq!(config.pool.acquire_timeout_secs, 30);
        assert_eq!(config.filter.unknown_operator, UnknownOperatorPolicy::Ignore);
        assert_eq!(config.listener.channels, vec!["data_channel", "feedback_channel"]);

        let options = config.store_options();
        assert_eq!(options.max_connections, 4);
        assert_eq!(options.busy_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_write_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connector.toml");
        let config = ConnectorConfig::default();
        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &config, true).unwrap();

        let reloaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(reloaded.pool.max_size, 10);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConnectorConfig::default();
        config.apply_overrides(|name| match name {
            ENV_DATABASE => Some("/tmp/override.db".to_string()),
            ENV_FEEDBACK_CHANNEL => Some("fb".to_string()),
            _ => None,
        });
        assert_eq!(config.database.as_deref(), Some("/tmp/override.db"));
        assert_eq!(config.listener.channels, vec!["data_channel", "fb"]);
    }

    #[test]
    fn test_customer_table_section() {
        let config: ConnectorConfig = toml::from_str(
            r#"
[customer_table]
table = "chat_log"

[customer_table.columns]
id = "msg_id"
customer_id = "tenant"
user_id = "author"
query = "question_text"
context = "ctx"
prompt = "full_prompt"
response = "bot_reply"
"#,
        )
        .unwrap();
        let table = config.customer_table.as_ref().unwrap().build().unwrap();
        assert_eq!(table.table(), "chat_log");
        assert_eq!(table.column("response").unwrap(), "bot_reply");

        assert!(ConnectorConfig::default().customer_table.is_none());
        let written = toml::to_string_pretty(&ConnectorConfig::default()).unwrap();
        assert!(!written.contains("customer_table"));
    }

    #[test]
    fn test_ensure_db_dir_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("connector.db");
        ensure_db_dir(&db).unwrap();
        assert!(db.parent().unwrap().exists());
    }
}
