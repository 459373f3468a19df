use anyhow::Result;
use fediref_federation::{FederationConfig, FreshnessWindow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub federation: FederationSection,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host this server answers on, e.g. `fedi.example.org`.
    pub host: String,
    /// Domain used in local handles. Defaults to `host`.
    #[serde(default)]
    pub account_domain: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Worker bits for generated ids; unique per process sharing a database.
    #[serde(default)]
    pub node_id: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            account_domain: None,
            protocol: default_protocol(),
            user_agent: None,
            node_id: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Statement timeout in seconds for PostgreSQL connections (0 = disabled).
    #[serde(default)]
    pub statement_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/fediref.db?mode=rwc".into(),
            max_connections: default_max_connections(),
            statement_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FederationSection {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_media_timeout_secs")]
    pub media_timeout_secs: u64,
    #[serde(default = "default_account_freshness_secs")]
    pub account_freshness_secs: u64,
    #[serde(default = "default_status_freshness_secs")]
    pub status_freshness_secs: u64,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_worker_queue_size")]
    pub worker_queue_size: usize,
    #[serde(default = "default_max_collection_pages")]
    pub max_collection_pages: usize,
    #[serde(default = "default_max_collection_items")]
    pub max_collection_items: usize,
}

impl Default for FederationSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            media_timeout_secs: default_media_timeout_secs(),
            account_freshness_secs: default_account_freshness_secs(),
            status_freshness_secs: default_status_freshness_secs(),
            worker_concurrency: default_worker_concurrency(),
            worker_queue_size: default_worker_queue_size(),
            max_collection_pages: default_max_collection_pages(),
            max_collection_items: default_max_collection_items(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MediaConfig {
    #[serde(default = "default_media_storage_path")]
    pub storage_path: String,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            storage_path: default_media_storage_path(),
            max_file_size: default_max_file_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LogConfig {
    /// Used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::Text,
        }
    }
}

fn default_protocol() -> String {
    "https".into()
}
fn default_max_connections() -> u32 {
    10
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_media_timeout_secs() -> u64 {
    120
}
fn default_account_freshness_secs() -> u64 {
    FreshnessWindow::DEFAULT_ACCOUNT.duration().as_secs()
}
fn default_status_freshness_secs() -> u64 {
    FreshnessWindow::DEFAULT_STATUS.duration().as_secs()
}
fn default_worker_concurrency() -> usize {
    4
}
fn default_worker_queue_size() -> usize {
    1024
}
fn default_max_collection_pages() -> usize {
    10
}
fn default_max_collection_items() -> usize {
    200
}
fn default_media_storage_path() -> String {
    "./data/media".into()
}
fn default_max_file_size() -> u64 {
    40 * 1024 * 1024
}
fn default_log_filter() -> String {
    "fediref=info".into()
}

/// Generate a commented config file template with the given values filled in.
fn generate_config_template(config: &Config) -> String {
    format!(
        r#"# fediref configuration
# Generated automatically on first run. Edit as needed.

[server]
host = "{host}"
# Domain shown in local handles, if it differs from host:
# account_domain = "example.org"
protocol = "{protocol}"
node_id = {node_id}

[database]
url = "{db_url}"
max_connections = {max_connections}

[federation]
request_timeout_secs = {request_timeout}
media_timeout_secs = {media_timeout}
# How long fetched accounts and statuses are served without a refetch.
account_freshness_secs = {account_freshness}
status_freshness_secs = {status_freshness}
worker_concurrency = {worker_concurrency}
worker_queue_size = {worker_queue_size}
# Bounds on remote collection walks (featured statuses).
max_collection_pages = {max_pages}
max_collection_items = {max_items}

[media]
storage_path = "{media_path}"
max_file_size = {max_file_size}

[log]
filter = "{log_filter}"
# "text" or "json"
format = "{log_format}"
"#,
        host = config.server.host,
        protocol = config.server.protocol,
        node_id = config.server.node_id,
        db_url = config.database.url,
        max_connections = config.database.max_connections,
        request_timeout = config.federation.request_timeout_secs,
        media_timeout = config.federation.media_timeout_secs,
        account_freshness = config.federation.account_freshness_secs,
        status_freshness = config.federation.status_freshness_secs,
        worker_concurrency = config.federation.worker_concurrency,
        worker_queue_size = config.federation.worker_queue_size,
        max_pages = config.federation.max_collection_pages,
        max_items = config.federation.max_collection_items,
        media_path = config.media.storage_path,
        max_file_size = config.media.max_file_size,
        log_filter = config.log.filter,
        log_format = match config.log.format {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        },
    )
}

// ── Config Loading ───────────────────────────────────────────────────────────

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();
            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, generate_config_template(&config))?;
            // Logging is not initialised yet.
            eprintln!("Generated default config at '{}'", path);
            config
        };

        // Environment variable overrides
        if let Ok(value) = std::env::var("FEDIREF_HOST") {
            config.server.host = value;
        }
        if let Ok(value) = std::env::var("FEDIREF_ACCOUNT_DOMAIN") {
            let trimmed = value.trim();
            config.server.account_domain = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
        }
        if let Ok(value) = std::env::var("FEDIREF_PROTOCOL") {
            config.server.protocol = value;
        }
        if let Ok(value) = std::env::var("FEDIREF_NODE_ID") {
            if let Ok(parsed) = value.parse::<u16>() {
                config.server.node_id = parsed;
            }
        }
        if let Ok(value) = std::env::var("FEDIREF_DATABASE_URL") {
            config.database.url = value;
        }
        if let Ok(value) = std::env::var("FEDIREF_DATABASE_MAX_CONNECTIONS") {
            if let Ok(parsed) = value.parse::<u32>() {
                config.database.max_connections = parsed.max(1);
            }
        }
        if let Ok(value) = std::env::var("FEDIREF_REQUEST_TIMEOUT_SECS") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.federation.request_timeout_secs = parsed.max(1);
            }
        }
        if let Ok(value) = std::env::var("FEDIREF_ACCOUNT_FRESHNESS_SECS") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.federation.account_freshness_secs = parsed;
            }
        }
        if let Ok(value) = std::env::var("FEDIREF_STATUS_FRESHNESS_SECS") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.federation.status_freshness_secs = parsed;
            }
        }
        if let Ok(value) = std::env::var("FEDIREF_WORKER_CONCURRENCY") {
            if let Ok(parsed) = value.parse::<usize>() {
                config.federation.worker_concurrency = parsed.clamp(1, 256);
            }
        }
        if let Ok(value) = std::env::var("FEDIREF_MEDIA_PATH") {
            config.media.storage_path = value;
        }
        if let Ok(value) = std::env::var("FEDIREF_MEDIA_MAX_FILE_SIZE") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.media.max_file_size = parsed;
            }
        }
        if let Ok(value) = std::env::var("FEDIREF_LOG_FORMAT") {
            match value.to_ascii_lowercase().as_str() {
                "json" => config.log.format = LogFormat::Json,
                "text" => config.log.format = LogFormat::Text,
                _ => {}
            }
        }

        config.federation_config().validate()?;
        Ok(config)
    }

    /// Resolver settings derived from the `[server]`, `[federation]` and
    /// `[media]` sections.
    pub fn federation_config(&self) -> FederationConfig {
        let defaults = FederationConfig::default();
        let host = self.server.host.trim().to_ascii_lowercase();
        FederationConfig {
            account_domain: self
                .server
                .account_domain
                .as_deref()
                .map(|d| d.trim().to_ascii_lowercase())
                .unwrap_or_else(|| host.clone()),
            host,
            protocol: self.server.protocol.clone(),
            user_agent: self
                .server
                .user_agent
                .clone()
                .unwrap_or(defaults.user_agent),
            node_id: self.server.node_id,
            request_timeout: Duration::from_secs(self.federation.request_timeout_secs),
            media_timeout: Duration::from_secs(self.federation.media_timeout_secs),
            account_freshness: Duration::from_secs(self.federation.account_freshness_secs).into(),
            status_freshness: Duration::from_secs(self.federation.status_freshness_secs).into(),
            worker_concurrency: self.federation.worker_concurrency,
            worker_queue_size: self.federation.worker_queue_size,
            max_collection_pages: self.federation.max_collection_pages,
            max_collection_items: self.federation.max_collection_items,
            media_max_size: self.media.max_file_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_resolver_defaults() {
        let federation = Config::default().federation_config();
        let defaults = FederationConfig::default();
        assert_eq!(federation.account_freshness, defaults.account_freshness);
        assert_eq!(federation.status_freshness, defaults.status_freshness);
        assert_eq!(federation.account_domain, federation.host);
        assert_eq!(federation.protocol, "https");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            host = "Fedi.Example.org"
            account_domain = "example.org"

            [federation]
            account_freshness_secs = 60

            [log]
            format = "json"
            "#,
        )
        .expect("parse");
        let federation = config.federation_config();
        assert_eq!(federation.host, "fedi.example.org");
        assert_eq!(federation.account_domain, "example.org");
        assert_eq!(federation.account_freshness.duration(), Duration::from_secs(60));
        assert_eq!(federation.worker_concurrency, 4);
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(config.database.url.starts_with("sqlite:"));
    }

    #[test]
    fn first_load_writes_a_template_that_loads_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("nested").join("fediref.toml");
        let path = config_path.to_str().expect("config path utf8");

        let first = Config::load(path).expect("generate");
        assert!(config_path.exists());
        let second = Config::load(path).expect("reload");
        assert_eq!(first.server.host, second.server.host);
        assert_eq!(first.database.url, second.database.url);
        assert_eq!(
            first.federation.max_collection_items,
            second.federation.max_collection_items
        );
    }

    #[test]
    fn invalid_node_id_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("fediref.toml");
        fs::write(&config_path, "[server]\nhost = \"example.org\"\nnode_id = 5000\n")
            .expect("write");
        let err = Config::load(config_path.to_str().expect("utf8")).expect_err("node id");
        assert!(err.to_string().contains("node_id"));
    }
}
