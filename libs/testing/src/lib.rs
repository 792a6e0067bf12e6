//! Shared fixtures for scheduler tests.

use std::io::Write;
use std::sync::Once;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::NamedTempFile;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Routes `tracing` output through the test harness so it only shows for
/// failing tests. Honours `RUST_LOG`; defaults to `debug`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A fixed UTC instant `secs` seconds after the epoch.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Writes `value` to a temporary JSON file that lives as long as the handle.
pub fn json_file(value: &serde_json::Value) -> anyhow::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    serde_json::to_writer_pretty(&mut file, value)?;
    file.flush()?;
    Ok(file)
}
