use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub connector: ConnectorConfig,
    pub sessions: SessionsConfig,
    pub addressing: AddressingConfig,
    pub bulk: BulkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8092,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub sqlite_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sqlite_path: "~/.keepconnect/chatbots.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    pub sidecar_url: String,
    pub request_timeout_secs: u64,
    pub pairing_poll_ms: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            sidecar_url: "http://127.0.0.1:4040".to_string(),
            request_timeout_secs: 30,
            pairing_poll_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub metadata_path: String,
    pub snapshot_interval_secs: u64,
    pub pairing_timeout_secs: u64,
    pub logout_timeout_secs: u64,
    pub inbound_queue: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            metadata_path: "~/.keepconnect/sessions/metadata.json".to_string(),
            snapshot_interval_secs: 300,
            pairing_timeout_secs: 180,
            logout_timeout_secs: 10,
            inbound_queue: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressingConfig {
    pub default_country_code: String,
    pub local_number_len: usize,
    pub domain_suffix: String,
}

impl Default for AddressingConfig {
    fn default() -> Self {
        Self {
            default_country_code: "91".to_string(),
            local_number_len: 10,
            domain_suffix: "s.whatsapp.net".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub max_concurrency: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self { max_concurrency: 16 }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn resolve_config_path() -> PathBuf {
    env::var("KEEPCONNECT_CONFIG")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde("~/.keepconnect/keepconnect.json"))
}

pub fn load_config() -> Config {
    let config_path = resolve_config_path();

    let mut cfg = Config::default();

    if config_path.exists() {
        match fs::read_to_string(&config_path) {
            Ok(raw) => match serde_json::from_str::<Config>(&raw) {
                Ok(file_cfg) => cfg = file_cfg,
                Err(err) => tracing::warn!(path = %config_path.display(), "ignoring unparsable config: {err}"),
            },
            Err(err) => tracing::warn!(path = %config_path.display(), "cannot read config: {err}"),
        }
    }

    apply_env_overrides(&mut cfg);
    cfg
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(token) = non_empty_env("KEEPCONNECT_TOKEN") {
        cfg.auth.token = Some(token);
    }

    if let Some(url) = non_empty_env("KEEPCONNECT_DATABASE_URL") {
        cfg.database.url = Some(url);
    }

    if let Some(path) = non_empty_env("KEEPCONNECT_SQLITE_PATH") {
        cfg.database.sqlite_path = path;
    }

    if let Some(url) = non_empty_env("KEEPCONNECT_SIDECAR_URL") {
        cfg.connector.sidecar_url = url;
    }

    if let Some(path) = non_empty_env("KEEPCONNECT_METADATA_PATH") {
        cfg.sessions.metadata_path = path;
    }

    if let Some(port) = non_empty_env("KEEPCONNECT_PORT").and_then(|p| p.trim().parse().ok()) {
        cfg.server.port = port;
    }
}

pub fn resolve_database_url(cfg: &Config) -> String {
    if let Some(url) = cfg.database.url.as_ref() {
        return url.to_string();
    }

    let path = expand_tilde(&cfg.database.sqlite_path);
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    format!("sqlite://{}?mode=rwc", path.to_string_lossy())
}
