// Dump file writer for operators

//! Writes the engine dump to a file on request, so operators can inspect
//! the entity graph and every station's policy stack of a running daemon.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Write `dump` to `path`, creating the parent directory if needed
pub fn write_dump<P: AsRef<Path>>(path: P, dump: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir).context("Failed to create dump directory")?;
        }
    }

    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let content = format!("TIMESTAMP={}\n{}", timestamp, dump);
    fs::write(path, content)
        .with_context(|| format!("Failed to write dump file {}", path.display()))?;

    Ok(())
}

/// Remove dump file on shutdown
pub fn cleanup<P: AsRef<Path>>(path: P) {
    let _ = fs::remove_file(path);
}
