//! Configuration loading and representation.

use std::net::SocketAddr;
use std::str::FromStr;

use tracing::warn;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Process configuration, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub bind_addr: SocketAddr,
    /// `None` runs the ledger on the in-memory store.
    pub database: Option<DatabaseConfig>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

impl core::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("run_migrations", &self.run_migrations)
            .finish()
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database: None,
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl LedgerConfig {
    /// Read `BIND_ADDR`, `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS` and
    /// `LEDGER_RUN_MIGRATIONS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LedgerConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let bind_addr = parse_or("BIND_ADDR", lookup("BIND_ADDR"), default_bind_addr());

        let database = match lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()) {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: parse_or(
                    "DATABASE_MAX_CONNECTIONS",
                    lookup("DATABASE_MAX_CONNECTIONS"),
                    DEFAULT_MAX_CONNECTIONS,
                )
                .max(1),
                run_migrations: lookup("LEDGER_RUN_MIGRATIONS")
                    .map(|raw| parse_flag("LEDGER_RUN_MIGRATIONS", &raw, true))
                    .unwrap_or(true),
            }),
            None => {
                warn!("DATABASE_URL not set; using in-memory ledger store");
                None
            }
        };

        Self {
            bind_addr,
            database,
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + core::fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, default = %default, "invalid configuration value; using default");
            default
        }
    }
}

fn parse_flag(key: &str, raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!(key, value = raw, default, "invalid boolean flag; using default");
            default
        }
    }
}
