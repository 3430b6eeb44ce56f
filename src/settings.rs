//! Runtime settings read from the environment (optionally seeded from `.env` via dotenvy).

use crate::error::ConfigError;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(StorageBackend::Postgres),
            "memory" | "mem" => Ok(StorageBackend::Memory),
            other => Err(ConfigError::Validation(format!(
                "invalid STORAGE: {} (expected postgres or memory)",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub storage: StorageBackend,
    pub bind_addr: String,
    /// Directory with `resources.json` (+ optional `relationships.json`, `indexes.json`). Built-in catalog when unset.
    pub catalog_path: Option<PathBuf>,
    /// When false every request acts with full grants.
    pub auth_enabled: bool,
    pub body_limit_bytes: usize,
    pub db_max_connections: u32,
    pub run_migrations: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: "postgres://localhost/seniorcare".into(),
            storage: StorageBackend::Postgres,
            bind_addr: "0.0.0.0:3000".into(),
            catalog_path: None,
            auth_enabled: false,
            body_limit_bytes: 2 * 1024 * 1024,
            db_max_connections: 5,
            run_migrations: true,
        }
    }
}

impl Settings {
    /// Read settings from the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut s = Settings::default();
        if let Some(v) = lookup("DATABASE_URL") {
            s.database_url = v;
        }
        if let Some(v) = lookup("STORAGE") {
            s.storage = v.parse()?;
        }
        if let Some(v) = lookup("BIND_ADDR") {
            s.bind_addr = v;
        }
        s.catalog_path = lookup("CATALOG_PATH").filter(|v| !v.is_empty()).map(PathBuf::from);
        if let Some(v) = lookup("AUTH_ENABLED") {
            s.auth_enabled = parse_bool("AUTH_ENABLED", &v)?;
        }
        if let Some(v) = lookup("BODY_LIMIT_BYTES") {
            s.body_limit_bytes = parse_number("BODY_LIMIT_BYTES", &v)?;
        }
        if let Some(v) = lookup("DB_MAX_CONNECTIONS") {
            s.db_max_connections = parse_number("DB_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = lookup("RUN_MIGRATIONS") {
            s.run_migrations = parse_bool("RUN_MIGRATIONS", &v)?;
        }
        Ok(s)
    }
}

fn parse_bool(key: &str, v: &str) -> Result<bool, ConfigError> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Validation(format!("{} must be a boolean, got '{}'", key, v))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, v: &str) -> Result<T, ConfigError> {
    v.trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{} must be a number, got '{}'", key, v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.storage, StorageBackend::Postgres);
        assert!(!s.auth_enabled);
        assert!(s.catalog_path.is_none());
    }

    #[test]
    fn reads_overrides() {
        let s = settings(&[
            ("STORAGE", "memory"),
            ("AUTH_ENABLED", "true"),
            ("BODY_LIMIT_BYTES", "1024"),
            ("CATALOG_PATH", "/etc/catalog"),
        ])
        .unwrap();
        assert_eq!(s.storage, StorageBackend::Memory);
        assert!(s.auth_enabled);
        assert_eq!(s.body_limit_bytes, 1024);
        assert_eq!(s.catalog_path, Some(PathBuf::from("/etc/catalog")));
    }

    #[test]
    fn rejects_garbage() {
        assert!(settings(&[("STORAGE", "redis")]).is_err());
        assert!(settings(&[("AUTH_ENABLED", "maybe")]).is_err());
        assert!(settings(&[("DB_MAX_CONNECTIONS", "-1")]).is_err());
    }
}
