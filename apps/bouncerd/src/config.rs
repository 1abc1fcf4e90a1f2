use std::env;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Tabular backend wired into the engine at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TablesBackend {
    /// No backend; table sources fail at first use.
    Disabled,
    /// Fetch grid documents over HTTP and parse them as JSON.
    JsonGrid,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Persist whitelist rows and options here; in-memory when unset.
    pub state_path: Option<PathBuf>,
    /// Source descriptor substituted for `default` rows.
    pub default_source: Option<String>,
    /// Bearer token for remote sources that do not carry their own.
    pub api_token: Option<String>,
    pub http_timeout: Duration,
    pub tables: TablesBackend,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid BOUNCERD_BIND_ADDR: {0}")]
    BindAddrParse(#[from] AddrParseError),
    #[error("invalid BOUNCERD_HTTP_TIMEOUT_MS: {0}")]
    HttpTimeoutParse(String),
    #[error("invalid BOUNCERD_TABLES: {0:?} (expected \"json-grid\")")]
    TablesBackendParse(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = lookup("BOUNCERD_BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:4200".to_string())
            .parse()?;
        let timeout_ms = optional(&lookup, "BOUNCERD_HTTP_TIMEOUT_MS")
            .unwrap_or_else(|| "10000".to_string());
        let http_timeout = timeout_ms
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::HttpTimeoutParse(timeout_ms))?;
        let tables = match optional(&lookup, "BOUNCERD_TABLES") {
            None => TablesBackend::Disabled,
            Some(token) => parse_tables_backend(&token)?,
        };
        Ok(Self {
            bind_addr,
            state_path: optional(&lookup, "BOUNCERD_STATE_PATH").map(PathBuf::from),
            default_source: optional(&lookup, "BOUNCERD_DEFAULT_SOURCE"),
            api_token: optional(&lookup, "BOUNCERD_API_TOKEN"),
            http_timeout,
            tables,
        })
    }
}

fn optional(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_tables_backend(token: &str) -> Result<TablesBackend, ConfigError> {
    match token.to_ascii_lowercase().as_str() {
        "json-grid" => Ok(TablesBackend::JsonGrid),
        other => Err(ConfigError::TablesBackendParse(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{Config, ConfigError, TablesBackend};

    fn lookup<'a>(values: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        |key| values.get(key).map(ToString::to_string)
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let values = HashMap::new();
        let config = Config::from_lookup(lookup(&values)).expect("config");
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:4200");
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.tables, TablesBackend::Disabled);
        assert!(config.state_path.is_none());
        assert!(config.default_source.is_none());
        assert!(config.api_token.is_none());
    }

    #[test]
    fn overrides_apply_and_blanks_count_as_unset() {
        let values = HashMap::from([
            ("BOUNCERD_BIND_ADDR", "0.0.0.0:9000"),
            ("BOUNCERD_HTTP_TIMEOUT_MS", "2500"),
            ("BOUNCERD_TABLES", "json-grid"),
            ("BOUNCERD_DEFAULT_SOURCE", "static; location=https://example.test/users.txt"),
            ("BOUNCERD_API_TOKEN", "   "),
        ]);
        let config = Config::from_lookup(lookup(&values)).expect("config");
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.http_timeout, Duration::from_millis(2500));
        assert_eq!(config.tables, TablesBackend::JsonGrid);
        assert_eq!(
            config.default_source.as_deref(),
            Some("static; location=https://example.test/users.txt")
        );
        assert!(config.api_token.is_none());
    }

    #[test]
    fn invalid_values_fail_with_the_offending_variable() {
        let values = HashMap::from([("BOUNCERD_HTTP_TIMEOUT_MS", "soon")]);
        let error = Config::from_lookup(lookup(&values)).expect_err("should fail");
        assert!(matches!(error, ConfigError::HttpTimeoutParse(value) if value == "soon"));

        let values = HashMap::from([("BOUNCERD_TABLES", "csv")]);
        let error = Config::from_lookup(lookup(&values)).expect_err("should fail");
        assert!(matches!(error, ConfigError::TablesBackendParse(value) if value == "csv"));

        let values = HashMap::from([("BOUNCERD_BIND_ADDR", "not-an-addr")]);
        let error = Config::from_lookup(lookup(&values)).expect_err("should fail");
        assert!(matches!(error, ConfigError::BindAddrParse(_)));
    }
}
