use std::net::SocketAddr;
use thiserror::Error;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5003";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct MongoDbConfig {
    pub connection_url: String,
    pub database_name: String,
    pub use_transactions: bool,
}

impl MongoDbConfig {
    pub fn new(connection_url: impl Into<String>) -> Self {
        Self {
            connection_url: connection_url.into(),
            database_name: "chat_service".to_string(),
            use_transactions: false,
        }
    }

    pub fn with_database_name(mut self, database_name: impl Into<String>) -> Self {
        self.database_name = database_name.into();
        self
    }

    /// Send-message writes the message and the conversation summary in one
    /// transaction. Needs a replica set.
    pub fn with_transactions(mut self, enabled: bool) -> Self {
        self.use_transactions = enabled;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    pub mongo: MongoDbConfig,
    pub redis_url: String,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let listen_addr = lookup("CHAT_SERVICE_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                var: "CHAT_SERVICE_ADDR",
                reason: e.to_string(),
            })?;

        let connection_url = lookup("MONGODB_URI").ok_or(ConfigError::Missing("MONGODB_URI"))?;
        let mut mongo = MongoDbConfig::new(connection_url);
        if let Some(name) = lookup("MONGODB_DATABASE") {
            mongo = mongo.with_database_name(name);
        }
        if let Some(flag) = lookup("MONGODB_TRANSACTIONS") {
            let enabled = parse_flag(&flag).ok_or_else(|| ConfigError::Invalid {
                var: "MONGODB_TRANSACTIONS",
                reason: format!("expected true or false, got {:?}", flag),
            })?;
            mongo = mongo.with_transactions(enabled);
        }

        let redis_url = lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());

        Ok(Self {
            listen_addr,
            mongo,
            redis_url,
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
