//! Runtime settings read from the environment (after `dotenvy`).

use crate::error::ConfigError;
use crate::lang::Language;
use crate::storage::Storage;
use std::str::FromStr;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/crud_scaffold";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_STORAGE_ROOT: &str = "storage/app/public";
pub const DEFAULT_STORAGE_URL: &str = "/storage";

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    /// Lifts the page size whitelist.
    pub debug: bool,
    pub langs: Vec<String>,
    pub primary_lang: String,
    pub db_max_connections: u32,
    pub max_body_bytes: usize,
    /// Directory uploaded files are written to.
    pub storage_root: String,
    /// Public prefix of stored files; a path (`/storage`) is served by the app.
    pub storage_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_url: DEFAULT_DATABASE_URL.into(),
            bind_addr: DEFAULT_BIND_ADDR.into(),
            debug: false,
            langs: vec!["en".into()],
            primary_lang: "en".into(),
            db_max_connections: 5,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            storage_root: DEFAULT_STORAGE_ROOT.into(),
            storage_url: DEFAULT_STORAGE_URL.into(),
        }
    }
}

fn parse<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();
        if let Some(v) = lookup("DATABASE_URL") {
            config.database_url = v;
        }
        if let Some(v) = lookup("BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Some(v) = lookup("APP_DEBUG") {
            config.debug = parse_bool("APP_DEBUG", &v)?;
        }
        if let Some(v) = lookup("APP_LANGS") {
            config.langs = v
                .split(',')
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
        }
        if let Some(v) = lookup("APP_PRIMARY_LANG") {
            config.primary_lang = v.trim().to_string();
        }
        if let Some(v) = lookup("DB_MAX_CONNECTIONS") {
            config.db_max_connections = parse("DB_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = lookup("MAX_BODY_BYTES") {
            config.max_body_bytes = parse("MAX_BODY_BYTES", &v)?;
        }
        if let Some(v) = lookup("STORAGE_ROOT") {
            config.storage_root = v;
        }
        if let Some(v) = lookup("STORAGE_URL") {
            config.storage_url = v;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_lang.is_empty() {
            return Err(ConfigError::Validation("APP_PRIMARY_LANG must not be empty".into()));
        }
        if self.db_max_connections == 0 {
            return Err(ConfigError::Validation("DB_MAX_CONNECTIONS must be at least 1".into()));
        }
        if self.storage_root.trim().is_empty() {
            return Err(ConfigError::Validation("STORAGE_ROOT must not be empty".into()));
        }
        Ok(())
    }

    pub fn language(&self) -> Language {
        Language::new(self.langs.clone(), self.primary_lang.clone())
    }

    pub fn storage(&self) -> Storage {
        Storage::new(&self.storage_root, self.storage_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        assert_eq!(from(&[]).unwrap(), AppConfig::default());
    }

    #[test]
    fn languages_are_split_and_primary_is_included() {
        let config = from(&[("APP_LANGS", "es, fr"), ("APP_PRIMARY_LANG", "en")]).unwrap();
        assert_eq!(config.langs, vec!["es".to_string(), "fr".to_string()]);
        let lang = config.language();
        assert_eq!(lang.primary(), "en");
        assert!(lang.all().iter().any(|l| l == "en"));
    }

    #[test]
    fn invalid_values_name_their_key() {
        let err = from(&[("DB_MAX_CONNECTIONS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DB_MAX_CONNECTIONS", .. }));
        assert!(from(&[("APP_DEBUG", "maybe")]).is_err());
        assert!(from(&[("DB_MAX_CONNECTIONS", "0")]).is_err());
        assert!(from(&[("APP_DEBUG", "true")]).unwrap().debug);
    }

    #[test]
    fn storage_location_is_configurable() {
        let config = from(&[("STORAGE_ROOT", "/srv/files"), ("STORAGE_URL", "https://cdn.example.com/")]).unwrap();
        let storage = config.storage();
        assert_eq!(storage.root(), std::path::Path::new("/srv/files"));
        assert_eq!(storage.file_url("a.pdf", "docs/"), "https://cdn.example.com/docs/a.pdf");
        assert!(from(&[("STORAGE_ROOT", " ")]).is_err());
    }
}
