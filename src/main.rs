//! `qubus serve` runs the cron HTTP endpoints, `qubus tick` runs a single tick
//! and prints its report. Settings come from `qubus.*` and `QUBUS_*` variables.
//!
//! This binary has no plugins, so its registry is empty and every job is
//! skipped. Applications that own callbacks build a [`Registry`] and call
//! [`server::serve`] or [`Worker::tick`] themselves.

use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use qubus::config::Settings;
use qubus::registry::Registry;
use qubus::server;
use qubus::worker::Worker;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if let Err(e) = run() {
        error!(target: "qubus::error", error = %e, "qubus stopped");
        std::process::exit(1);
    }
}

fn run() -> qubus::Result<()> {
    let settings = Settings::load("qubus")?;
    let command = std::env::args().nth(1).unwrap_or_else(|| String::from("serve"));
    let registry = Registry::new();
    match command.as_str() {
        "tick" => {
            warn!("no job callbacks are registered, jobs will be skipped rather than run");
            let mut worker = Worker::from_settings(&settings, registry)?;
            let report = worker.tick()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        "serve" => server::serve(&settings, registry),
        other => Err(qubus::QubusError::Config(format!("unknown command '{other}', expected serve or tick"))),
    }
}
