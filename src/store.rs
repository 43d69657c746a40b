//! 进度持久化
//!
//! 缓存、用量统计以及运行中调整过的端点顺序和请求速率，按批次写入存储。
//! 存储失败只记录日志，不会中止运行。

use crate::cache::CacheStore;
use crate::endpoints::EndpointList;
use crate::error::{Result, TranslationError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// 累计用量统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UsageStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub words_translated: u64,
    pub cache_hits: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// 持久化快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistedState {
    pub cache_store: CacheStore,
    pub usage_stats: UsageStats,
    pub endpoints: Option<EndpointList>,
    pub requests_per_minute: Option<u32>,
}

/// 持久化接口
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self) -> Result<PersistedState>;

    async fn save(&self, state: &PersistedState) -> Result<()>;
}

/// JSON 文件存储
///
/// 先写临时文件再重命名，避免写到一半的文件覆盖旧数据。
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ProgressStore for JsonFileStore {
    async fn load(&self) -> Result<PersistedState> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} 不存在，使用空状态", self.path.display());
                Ok(PersistedState::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("进度已保存到 {}", self.path.display());
        Ok(())
    }
}

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<PersistedState>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
            saves: Mutex::new(0),
        }
    }

    /// 最近一次保存的快照
    pub fn snapshot(&self) -> PersistedState {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn load(&self) -> Result<PersistedState> {
        Ok(self.snapshot())
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| TranslationError::Storage(e.to_string()))?;
        *guard = state.clone();
        drop(guard);
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::testing::valid_result;

    #[tokio::test]
    async fn missing_file_loads_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("progress.json"));
        assert_eq!(store.load().await.unwrap(), PersistedState::default());
    }

    #[tokio::test]
    async fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("progress.json"));

        let mut state = PersistedState::default();
        state.cache_store.insert(
            "hello".into(),
            CacheEntry {
                timestamp: 1_700_000_000_000,
                result: valid_result("hello"),
            },
        );
        state.usage_stats.total_requests = 3;
        state.requests_per_minute = Some(24);
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, state);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupted_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, TranslationError::Serialization(_)));
    }

    #[tokio::test]
    async fn memory_store_counts_saves() {
        let store = MemoryStore::new();
        store.save(&PersistedState::default()).await.unwrap();
        store.save(&PersistedState::default()).await.unwrap();
        assert_eq!(store.save_count(), 2);
    }
}
