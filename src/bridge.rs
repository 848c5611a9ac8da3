use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Whole-file read/write access to the app data directory, as the host shell exposes it.
#[async_trait]
pub trait DataBridge: Send + Sync {
    /// `Ok(None)` when the file does not exist yet.
    async fn read_data_file(&self, file: &str) -> AppResult<Option<String>>;
    async fn write_data_file(&self, file: &str, contents: &str) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct FsBridge {
    root: PathBuf,
}

impl FsBridge {
    pub fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, file: &str) -> AppResult<PathBuf> {
        let trimmed = file.trim();
        if trimmed.is_empty()
            || trimmed.contains('/')
            || trimmed.contains('\\')
            || trimmed.contains("..")
        {
            return Err(AppError::InvalidInput(format!("Invalid data file name '{}'", file)));
        }
        Ok(self.root.join(trimmed))
    }
}

#[async_trait]
impl DataBridge for FsBridge {
    async fn read_data_file(&self, file: &str) -> AppResult<Option<String>> {
        let path = self.resolve(file)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(AppError::Io(format!("{}: {}", path.display(), error))),
        }
    }

    async fn write_data_file(&self, file: &str, contents: &str) -> AppResult<()> {
        let path = self.resolve(file)?;
        // Unique temp name: overlapping writes must not share one.
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", file.trim(), uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, contents.as_bytes())
            .await
            .map_err(|error| AppError::Io(format!("{}: {}", tmp.display(), error)))?;
        if let Err(error) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::Io(format!("{}: {}", path.display(), error)));
        }
        Ok(())
    }
}

/// In-memory bridge; keeps every write so tests can inspect the history.
#[derive(Debug, Default)]
pub struct MemoryBridge {
    files: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<(String, String)>>,
    fail_writes: Mutex<bool>,
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(file: &str, contents: &str) -> Self {
        let bridge = Self::default();
        bridge
            .files
            .lock()
            .expect("memory bridge lock")
            .insert(file.to_string(), contents.to_string());
        bridge
    }

    pub fn contents(&self, file: &str) -> Option<String> {
        self.files.lock().expect("memory bridge lock").get(file).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().expect("memory bridge lock").len()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().expect("memory bridge lock") = fail;
    }
}

#[async_trait]
impl DataBridge for MemoryBridge {
    async fn read_data_file(&self, file: &str) -> AppResult<Option<String>> {
        let files = self
            .files
            .lock()
            .map_err(|_| AppError::Internal("memory bridge mutex poisoned".to_string()))?;
        Ok(files.get(file).cloned())
    }

    async fn write_data_file(&self, file: &str, contents: &str) -> AppResult<()> {
        if *self
            .fail_writes
            .lock()
            .map_err(|_| AppError::Internal("memory bridge mutex poisoned".to_string()))?
        {
            return Err(AppError::Io(format!("write to {} rejected", file)));
        }
        self.files
            .lock()
            .map_err(|_| AppError::Internal("memory bridge mutex poisoned".to_string()))?
            .insert(file.to_string(), contents.to_string());
        self.writes
            .lock()
            .map_err(|_| AppError::Internal("memory bridge mutex poisoned".to_string()))?
            .push((file.to_string(), contents.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DataBridge, FsBridge};

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bridge = FsBridge::new(dir.path()).expect("bridge");
        assert!(bridge.read_data_file("state.json").await.expect("read").is_none());
    }

    #[tokio::test]
    async fn write_then_read_returns_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bridge = FsBridge::new(dir.path()).expect("bridge");
        bridge.write_data_file("state.json", "{\"version\":3}").await.expect("write");
        let read = bridge.read_data_file("state.json").await.expect("read");
        assert_eq!(read.as_deref(), Some("{\"version\":3}"));
        let leftovers = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bridge = FsBridge::new(dir.path()).expect("bridge");
        let err = bridge.write_data_file("../outside.json", "{}").await.expect_err("reject");
        assert!(err.to_string().starts_with("INVALID_INPUT"));
    }
}
