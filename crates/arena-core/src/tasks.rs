//! Task references and the on-disk task catalog.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task `{id}` not found under {dir}")]
    NotFound { id: String, dir: PathBuf },

    #[error("no task files under {0}")]
    Empty(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid task file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, TaskError>;

/// One task file an episode is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: String,
    pub path: PathBuf,
}

impl TaskRef {
    /// Reference named after the file stem of `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { id, path }
    }

    /// Parsed task file contents.
    pub fn load_metadata(&self) -> Result<Value> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| TaskError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| TaskError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

/// Directory of `<id>.json` task files.
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    root: PathBuf,
}

impl TaskCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{id}.json`, which must exist.
    pub fn resolve(&self, id: &str) -> Result<TaskRef> {
        let path = self.root.join(format!("{id}.json"));
        if !path.is_file() {
            return Err(TaskError::NotFound {
                id: id.to_string(),
                dir: self.root.clone(),
            });
        }
        Ok(TaskRef {
            id: id.to_string(),
            path,
        })
    }

    /// First task file found below the root, in sorted path order.
    pub fn first_available(&self) -> Result<TaskRef> {
        let mut pending = vec![self.root.clone()];
        let mut found = Vec::new();
        while let Some(dir) = pending.pop() {
            let entries = std::fs::read_dir(&dir).map_err(|source| TaskError::Io {
                path: dir.clone(),
                source,
            })?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "json") {
                    found.push(path);
                }
            }
        }
        found.sort();
        found
            .into_iter()
            .next()
            .map(TaskRef::from_path)
            .ok_or_else(|| TaskError::Empty(self.root.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_existing_and_missing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pick_and_place-1.json"), r#"{"goal": "x"}"#).unwrap();
        let catalog = TaskCatalog::new(dir.path());

        let task = catalog.resolve("pick_and_place-1").unwrap();
        assert_eq!(task.id, "pick_and_place-1");
        assert_eq!(task.load_metadata().unwrap()["goal"], "x");

        assert!(matches!(
            catalog.resolve("missing"),
            Err(TaskError::NotFound { id, .. }) if id == "missing"
        ));
    }

    #[test]
    fn test_first_available_searches_recursively() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("b/trial")).unwrap();
        std::fs::create_dir_all(dir.path().join("a/trial")).unwrap();
        std::fs::write(dir.path().join("b/trial/game.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a/trial/game.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a/notes.txt"), "").unwrap();

        let task = TaskCatalog::new(dir.path()).first_available().unwrap();
        assert_eq!(task.path, dir.path().join("a/trial/game.json"));
        assert_eq!(task.id, "game");
    }

    #[test]
    fn test_first_available_on_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            TaskCatalog::new(dir.path()).first_available(),
            Err(TaskError::Empty(_))
        ));
    }

    #[test]
    fn test_invalid_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            TaskRef::from_path(&path).load_metadata(),
            Err(TaskError::Parse { .. })
        ));
    }
}
