//! Runtime configuration.
//!
//! Reads the `[store]` and `[session]` sections of `config/default.toml`.
//! A missing file, unparsable file or absent section falls back to defaults;
//! the store connection string is then overridden from the environment.

use std::path::{Path, PathBuf};

use hanimd_store::StoreConfig;
use tracing::{debug, warn};

/// Where the session files live and where encoded strings are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub dir: PathBuf,
    pub output: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("DataBase/session/principale"),
            output: PathBuf::from("session_id.txt"),
        }
    }
}

/// Everything the CLI reads from its config file.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub session: SessionConfig,
}

/// Load configuration from `path`, then apply environment overrides.
pub fn load_config(path: &Path) -> AppConfig {
    let mut config = load_file(path);
    config.store = config.store.apply_env();
    config
}

fn load_file(path: &Path) -> AppConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => {
            debug!(path = %path.display(), "no config file, using defaults");
            return AppConfig::default();
        }
    };
    let table: toml::Table = match content.parse() {
        Ok(t) => t,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config file is not valid TOML, using defaults");
            return AppConfig::default();
        }
    };
    parse_table(&table)
}

fn parse_table(table: &toml::Table) -> AppConfig {
    let store = match table.get("store") {
        Some(value @ toml::Value::Table(_)) => {
            let parsed: Result<StoreConfig, _> = value.clone().try_into();
            parsed.unwrap_or_else(|e| {
                warn!(error = %e, "invalid [store] section, using defaults");
                StoreConfig::default()
            })
        }
        _ => StoreConfig::default(),
    };

    let defaults = SessionConfig::default();
    let session = match table.get("session") {
        Some(toml::Value::Table(s)) => SessionConfig {
            dir: s
                .get("dir")
                .and_then(|v| v.as_str())
                .map(PathBuf::from)
                .unwrap_or(defaults.dir),
            output: s
                .get("output")
                .and_then(|v| v.as_str())
                .map(PathBuf::from)
                .unwrap_or(defaults.output),
        },
        _ => defaults,
    };

    AppConfig { store, session }
}
