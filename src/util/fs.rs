//! Filesystem helpers for the template store and JSON documents.

use crate::util::{LocateError, LocateResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Total size in bytes of all regular files below `dir` (recursive).
///
/// Missing directories count as empty.
pub(crate) fn dir_size_bytes(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut total = 0u64;
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            total += dir_size_bytes(&entry.path());
        } else {
            total += meta.len();
        }
    }
    total
}

/// Serializes `value` as pretty JSON and replaces `path` through a sibling temp file.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> LocateResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| LocateError::io(parent, err))?;
    }
    let json = serde_json::to_string_pretty(value).map_err(LocateError::json)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|err| LocateError::io(&tmp, err))?;
    fs::rename(&tmp, path).map_err(|err| LocateError::io(path, err))?;
    Ok(())
}

/// Reads and parses a JSON document.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> LocateResult<T> {
    let text = fs::read_to_string(path).map_err(|err| LocateError::io(path, err))?;
    serde_json::from_str(&text).map_err(LocateError::json)
}

/// Removes a file, treating "already gone" as success.
pub(crate) fn remove_file_if_exists(path: &Path) -> LocateResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(LocateError::io(path, err)),
    }
}
