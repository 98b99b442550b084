//! Atomic JSON document writes.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

/// Write a JSON document atomically: temp file in the same directory,
/// fsync, rename into place. Readers see either the old or the new
/// document, never a mix.
pub(crate) fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("document.json");
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let content = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    let mut temp_file = std::fs::File::create(&temp_path)?;
    temp_file.write_all(content.as_bytes())?;
    temp_file.sync_all()?;
    std::fs::rename(&temp_path, path)
}
