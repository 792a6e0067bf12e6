use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    /// JSON snapshot loaded at startup, if any.
    pub snapshot_path: Option<PathBuf>,
    pub scheduler_interval: Duration,
    pub compaction_interval: Duration,
    pub liveness_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("SCHED_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let log_level = std::env::var("SCHED_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let snapshot_path = std::env::var("SCHED_SNAPSHOT_PATH")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            listen_addr,
            log_level,
            snapshot_path,
            scheduler_interval: secs_from_env("SCHED_SCHEDULER_INTERVAL_SECS", 5)?,
            compaction_interval: secs_from_env("SCHED_COMPACTION_INTERVAL_SECS", 60)?,
            liveness_interval: secs_from_env("SCHED_LIVENESS_INTERVAL_SECS", 10)?,
        })
    }
}

fn secs_from_env(name: &str, default: u64) -> Result<Duration> {
    match std::env::var(name) {
        Ok(value) => parse_secs(name, &value),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

fn parse_secs(name: &str, value: &str) -> Result<Duration> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{name} must be a whole number of seconds, got {value:?}"))?;
    anyhow::ensure!(secs > 0, "{name} must be greater than zero");
    Ok(Duration::from_secs(secs))
}
