//! Provider Configuration
//!
//! Connection settings for the three providers and the rules for inferring
//! which provider a connection string belongs to.
//!
//! Detection happens before any network I/O: an unrecognized scheme is a
//! [`DatabaseError::Connection`] straight away.

use crate::db::error::DatabaseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const DEFAULT_DOCUMENT_POOL_SIZE: u32 = 10;
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_MIN_CONNECTIONS: u32 = 5;
const DEFAULT_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_COMMAND_TIMEOUT: u64 = 60;

/// The three interchangeable storage engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Document database (MongoDB)
    Document,
    /// Pooled relational database (PostgreSQL)
    Relational,
    /// Hosted REST store (PostgREST / Supabase)
    Rest,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Document => "document",
            ProviderKind::Relational => "relational",
            ProviderKind::Rest => "rest",
        }
    }

    /// Parse a provider name as used in `DATABASE_PROVIDER`.
    pub fn parse(name: &str) -> Result<Self, DatabaseError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "document" | "mongodb" | "mongo" => Ok(ProviderKind::Document),
            "relational" | "postgres" | "postgresql" => Ok(ProviderKind::Relational),
            "rest" | "supabase" | "postgrest" => Ok(ProviderKind::Rest),
            other => Err(DatabaseError::connection(
                "config",
                format!("unknown database provider '{other}'"),
            )),
        }
    }

    /// Infer the provider from a connection string.
    ///
    /// - `mongodb://`, `mongodb+srv://` → Document
    /// - `postgres://`, `postgresql://` → Relational
    /// - `http(s)://` on a `*.supabase.co` / `*.supabase.in` host, or a URL
    ///   whose path ends in `/rest/v1` → Rest
    pub fn detect(connection_string: &str) -> Result<Self, DatabaseError> {
        let trimmed = connection_string.trim();
        let (scheme, _) = trimmed.split_once("://").ok_or_else(|| {
            DatabaseError::connection(
                "config",
                format!("connection string has no scheme: '{}'", redact(trimmed)),
            )
        })?;

        match scheme.to_ascii_lowercase().as_str() {
            "mongodb" | "mongodb+srv" => Ok(ProviderKind::Document),
            "postgres" | "postgresql" => Ok(ProviderKind::Relational),
            "http" | "https" => {
                let parsed = url::Url::parse(trimmed).map_err(|e| {
                    DatabaseError::connection("config", format!("invalid URL: {e}"))
                })?;
                let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
                let hosted = host.ends_with(".supabase.co") || host.ends_with(".supabase.in");
                if hosted || parsed.path().trim_end_matches('/').ends_with("/rest/v1") {
                    Ok(ProviderKind::Rest)
                } else {
                    Err(DatabaseError::connection(
                        "config",
                        format!("unrecognized REST host '{host}'"),
                    ))
                }
            }
            other => Err(DatabaseError::connection(
                "config",
                format!("unsupported connection scheme '{other}'"),
            )),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strip credentials from a connection string before it reaches a log line.
pub fn redact(connection_string: &str) -> String {
    match url::Url::parse(connection_string) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => connection_string.to_string(),
    }
}

/// Document provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentConfig {
    pub connection_string: String,

    /// Database to use; falls back to the URI path, then `omnistore`
    #[serde(default)]
    pub database_name: Option<String>,

    #[serde(default = "default_document_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl DocumentConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            database_name: None,
            pool_size: DEFAULT_DOCUMENT_POOL_SIZE,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }

    pub fn with_database(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if ProviderKind::detect(&self.connection_string).ok() != Some(ProviderKind::Document) {
            return Err("connection_string must use the mongodb:// or mongodb+srv:// scheme".to_string());
        }
        if self.pool_size == 0 {
            return Err("pool_size must be greater than 0".to_string());
        }
        if self.timeout_seconds == 0 {
            return Err("timeout_seconds must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Relational provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalConfig {
    pub connection_string: String,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds before a pool checkout or statement is abandoned
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
}

impl RelationalConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if ProviderKind::detect(&self.connection_string).ok() != Some(ProviderKind::Relational) {
            return Err("connection_string must use the postgres:// or postgresql:// scheme".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        if self.min_connections > self.max_connections {
            return Err(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                self.min_connections, self.max_connections
            ));
        }
        if self.command_timeout == 0 {
            return Err("command_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// REST provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`
    pub project_url: String,

    /// Service-role API key sent as `apikey` and bearer token
    pub service_key: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl RestConfig {
    pub fn new(project_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            project_url: project_url.into(),
            service_key: service_key.into(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Base URL of the table endpoints (`…/rest/v1`).
    pub fn rest_base(&self) -> String {
        let base = self.project_url.trim_end_matches('/');
        if base.ends_with("/rest/v1") {
            base.to_string()
        } else {
            format!("{base}/rest/v1")
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let parsed = url::Url::parse(&self.project_url)
            .map_err(|e| format!("project_url is not a valid URL: {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err("project_url must use http or https".to_string());
        }
        if self.service_key.trim().is_empty() {
            return Err("service_key cannot be empty".to_string());
        }
        if self.timeout_seconds == 0 {
            return Err("timeout_seconds must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Configuration for exactly one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderConfig {
    Document(DocumentConfig),
    Relational(RelationalConfig),
    Rest(RestConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::Document(_) => ProviderKind::Document,
            ProviderConfig::Relational(_) => ProviderKind::Relational,
            ProviderConfig::Rest(_) => ProviderKind::Rest,
        }
    }

    /// Build a default configuration for whichever provider `url` belongs to.
    ///
    /// The REST provider additionally needs a service key.
    pub fn from_url(url: &str, service_key: Option<String>) -> Result<Self, DatabaseError> {
        let config = match ProviderKind::detect(url)? {
            ProviderKind::Document => ProviderConfig::Document(DocumentConfig::new(url)),
            ProviderKind::Relational => ProviderConfig::Relational(RelationalConfig::new(url)),
            ProviderKind::Rest => {
                let key = service_key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
                    DatabaseError::connection("rest", "a service key is required for the REST provider")
                })?;
                ProviderConfig::Rest(RestConfig::new(url, key))
            }
        };
        Ok(config)
    }

    /// Read configuration from environment variables.
    ///
    /// `DATABASE_PROVIDER` selects the provider explicitly; otherwise it is
    /// inferred from `DATABASE_URL`, falling back to `SUPABASE_URL`.
    pub fn from_env() -> Result<Self, DatabaseError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`ProviderConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DatabaseError> {
        let explicit = lookup("DATABASE_PROVIDER")
            .filter(|v| !v.trim().is_empty())
            .map(|v| ProviderKind::parse(&v))
            .transpose()?;
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        let supabase_url = lookup("SUPABASE_URL").filter(|v| !v.trim().is_empty());

        let kind = match (explicit, &database_url, &supabase_url) {
            (Some(kind), _, _) => kind,
            (None, Some(url), _) => ProviderKind::detect(url)?,
            (None, None, Some(_)) => ProviderKind::Rest,
            (None, None, None) => {
                return Err(DatabaseError::connection(
                    "config",
                    "neither DATABASE_URL nor SUPABASE_URL is set",
                ))
            }
        };

        let missing = |name: &str| DatabaseError::connection("config", format!("{name} is not set"));
        let number = |name: &str| -> Result<Option<u64>, DatabaseError> {
            lookup(name)
                .map(|raw| {
                    raw.trim().parse::<u64>().map_err(|_| {
                        DatabaseError::connection("config", format!("{name} must be a number, got '{raw}'"))
                    })
                })
                .transpose()
        };
        let count = |name: &str| -> Result<Option<u32>, DatabaseError> {
            number(name)?
                .map(|value| {
                    u32::try_from(value).map_err(|_| {
                        DatabaseError::validation("config", format!("{name} is out of range, got {value}"))
                    })
                })
                .transpose()
        };

        let config = match kind {
            ProviderKind::Document => {
                let mut config =
                    DocumentConfig::new(database_url.ok_or_else(|| missing("DATABASE_URL"))?);
                config.database_name = lookup("MONGODB_DATABASE").filter(|v| !v.is_empty());
                if let Some(size) = count("DB_POOL_SIZE")? {
                    config.pool_size = size;
                }
                if let Some(secs) = number("DB_TIMEOUT_SECONDS")? {
                    config.timeout_seconds = secs;
                }
                ProviderConfig::Document(config)
            }
            ProviderKind::Relational => {
                let mut config =
                    RelationalConfig::new(database_url.ok_or_else(|| missing("DATABASE_URL"))?);
                if let Some(min) = count("DB_MIN_CONNECTIONS")? {
                    config.min_connections = min;
                }
                if let Some(max) = count("DB_MAX_CONNECTIONS")? {
                    config.max_connections = max;
                }
                if let Some(secs) = number("DB_COMMAND_TIMEOUT")? {
                    config.command_timeout = secs;
                }
                ProviderConfig::Relational(config)
            }
            ProviderKind::Rest => {
                let url = supabase_url
                    .or(database_url)
                    .ok_or_else(|| missing("SUPABASE_URL"))?;
                let key = lookup("SUPABASE_SERVICE_KEY")
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| missing("SUPABASE_SERVICE_KEY"))?;
                let mut config = RestConfig::new(url, key);
                if let Some(secs) = number("DB_TIMEOUT_SECONDS")? {
                    config.timeout_seconds = secs;
                }
                ProviderConfig::Rest(config)
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the wrapped configuration.
    pub fn validate(&self) -> Result<(), DatabaseError> {
        let result = match self {
            ProviderConfig::Document(c) => c.validate(),
            ProviderConfig::Relational(c) => c.validate(),
            ProviderConfig::Rest(c) => c.validate(),
        };
        result.map_err(|message| DatabaseError::connection(self.kind().as_str(), message))
    }
}

fn default_document_pool_size() -> u32 {
    DEFAULT_DOCUMENT_POOL_SIZE
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_min_connections() -> u32 {
    DEFAULT_MIN_CONNECTIONS
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT
}
