//! Storage for the data perimeter on/off flag.

use async_trait::async_trait;
use perim_core::{PerimeterError, PerimeterResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

#[async_trait]
pub trait PerimeterStateStore: Send + Sync {
    async fn get(&self) -> PerimeterResult<bool>;

    async fn set(&self, enabled: bool) -> PerimeterResult<()>;
}

/// Flag held in process memory; starts disabled and resets on restart.
#[derive(Debug, Default)]
pub struct MemoryPerimeterState {
    enabled: Mutex<bool>,
}

impl MemoryPerimeterState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PerimeterStateStore for MemoryPerimeterState {
    async fn get(&self) -> PerimeterResult<bool> {
        Ok(*self.enabled.lock().await)
    }

    async fn set(&self, enabled: bool) -> PerimeterResult<()> {
        *self.enabled.lock().await = enabled;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    enabled: bool,
}

/// Flag persisted as `{"enabled": bool}`. A missing file reads as disabled.
#[derive(Debug)]
pub struct FilePerimeterState {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePerimeterState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> PerimeterResult<bool> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(serde_json::from_str::<StateFile>(&text)?.enabled),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PerimeterError::io(format!("cannot read {}: {}", self.path.display(), e))),
        }
    }
}

#[async_trait]
impl PerimeterStateStore for FilePerimeterState {
    async fn get(&self) -> PerimeterResult<bool> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn set(&self, enabled: bool) -> PerimeterResult<()> {
        let _guard = self.lock.lock().await;
        let body = serde_json::to_vec(&StateFile { enabled })?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| PerimeterError::io(format!("cannot write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| PerimeterError::io(format!("cannot replace {}: {}", self.path.display(), e)))?;
        log::debug!("perimeter flag stored at {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_flag_round_trip() {
        let state = MemoryPerimeterState::new();
        tokio_test::block_on(async {
            assert!(!state.get().await.unwrap());
            state.set(true).await.unwrap();
            assert!(state.get().await.unwrap());
        });
    }

    #[tokio::test]
    async fn file_flag_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perimeter.json");

        let first = FilePerimeterState::new(&path);
        assert!(!first.get().await.unwrap());
        first.set(true).await.unwrap();

        let second = FilePerimeterState::new(&path);
        assert!(second.get().await.unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"enabled":true}"#);
    }

    #[tokio::test]
    async fn corrupt_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perimeter.json");
        std::fs::write(&path, "yes").unwrap();
        let err = FilePerimeterState::new(&path).get().await.unwrap_err();
        assert_eq!(err.kind, perim_core::PerimeterErrorKind::Parse);
    }
}
