//! Runtime settings, read with the `config` crate.
//!
//! Settings are layered: built-in defaults, then an optional settings file
//! (`qubus.toml`, `qubus.json`, ... whatever extension `config` recognises),
//! then environment variables prefixed with `QUBUS_`.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database file backing the relational store.
    pub database_path: PathBuf,
    /// Un-tenanted table prefix, e.g. `qub_`.
    pub base_prefix: String,
    /// Site this process serves. Site 1 is the main site.
    pub site_id: u64,
    /// Directory holding one JSON document per store table.
    pub store_path: PathBuf,
    /// Directory holding job lock files.
    pub lock_dir: PathBuf,
    pub log_prepared_statements: bool,
    pub throw_transaction_exceptions: bool,
    pub bind_address: String,
    pub cron_path: String,
    /// How long a claimed queue item stays invisible to other claims.
    pub lease_seconds: u64,
    pub http_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("qubus.db"),
            base_prefix: String::from("qub_"),
            site_id: 1,
            store_path: PathBuf::from("data"),
            lock_dir: PathBuf::from("data/locks"),
            log_prepared_statements: false,
            throw_transaction_exceptions: true,
            bind_address: String::from("127.0.0.1:8080"),
            cron_path: String::from("/cron"),
            lease_seconds: 30,
            http_timeout_seconds: 10,
        }
    }
}

impl Settings {
    /// Load settings from `<name>.*` (if present) and `QUBUS_*` variables.
    pub fn load(name: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(name).required(false))
            .add_source(Environment::with_prefix("QUBUS"))
            .build()?
            .try_deserialize::<Settings>()?;
        Ok(settings)
    }
}
