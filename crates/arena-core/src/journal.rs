//! Append-only JSON journals on local disk.
//!
//! A journal file holds one JSON object whose named arrays collect entries,
//! e.g. `{"events": [...]}`. Appending merges into what is already there.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("failed to write journal {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode journal {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, JournalError>;

/// Append `entry` to the array under `key` in the journal at `path`.
///
/// Parent directories are created. A missing, unreadable or corrupt file is
/// treated as an empty journal; a non-array value under `key` is replaced.
pub async fn append_entry(path: &Path, key: &str, entry: Value) -> Result<()> {
    let io_err = |source| JournalError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut doc = read_object(path).await;
    let slot = doc.entry(key.to_string()).or_insert_with(|| Value::Array(Vec::new()));
    match slot {
        Value::Array(entries) => entries.push(entry),
        other => *other = Value::Array(vec![entry]),
    }

    let text = serde_json::to_string_pretty(&Value::Object(doc)).map_err(|source| JournalError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    tokio::fs::write(path, text).await.map_err(io_err)
}

/// Entries under `key`, empty when the file or key is absent.
pub async fn read_entries(path: &Path, key: &str) -> Vec<Value> {
    match read_object(path).await.remove(key) {
        Some(Value::Array(entries)) => entries,
        _ => Vec::new(),
    }
}

async fn read_object(path: &Path) -> Map<String, Value> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Map::new(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "journal unreadable, starting fresh");
            return Map::new();
        }
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!(path = %path.display(), "journal is not a JSON object, starting fresh");
            Map::new()
        }
    }
}
