use crate::error::{Error, Result};
use std::env;

const DEFAULT_DATABASE_URL: &str = "sqlite:credibility.db";

/// Runtime configuration, read from the process environment.
///
/// `main` calls `dotenvy::dotenv()` first, so values from a `.env` file are
/// visible here as well.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub admin_password: Option<String>,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 5,
            admin_password: None,
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.database_url);
        let admin_password = lookup("ADMIN_PASSWORD").filter(|v| !v.is_empty());

        let config = Self {
            database_url,
            max_connections: parse_number(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            admin_password,
            default_page_size: parse_number(&lookup, "DEFAULT_PAGE_SIZE", defaults.default_page_size)?,
            max_page_size: parse_number(&lookup, "MAX_PAGE_SIZE", defaults.max_page_size)?,
        };

        if config.max_connections == 0 {
            return Err(Error::Config("DATABASE_MAX_CONNECTIONS must be at least 1".into()));
        }
        if config.default_page_size == 0 || config.default_page_size > config.max_page_size {
            return Err(Error::Config(format!(
                "DEFAULT_PAGE_SIZE must be between 1 and MAX_PAGE_SIZE ({})",
                config.max_page_size
            )));
        }

        Ok(config)
    }

    /// Selects the in-memory store instead of SQLite.
    pub fn uses_memory_store(&self) -> bool {
        self.database_url == "memory"
    }

    /// Admin gate. Without a configured password every credential is refused.
    pub fn is_admin(&self, credential: Option<&str>) -> bool {
        match (&self.admin_password, credential) {
            (Some(expected), Some(supplied)) => expected == supplied,
            _ => false,
        }
    }
}

fn parse_number<F>(lookup: &F, key: &str, default: u32) -> Result<u32>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u32>()
            .map_err(|e| Error::Config(format!("{} is not a valid number ({}): {}", key, raw, e))),
        _ => Ok(default),
    }
}
