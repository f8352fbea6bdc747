//! Rule persistence.
//!
//! [`RuleRepository`] is a stateless load/save port. Loading never fails from
//! the caller's point of view: a missing, unreadable or corrupt file yields
//! the built-in defaults. Saving reports failure but leaves it to the caller
//! to decide what to do; the in-memory store stays authoritative either way.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use crate::config::StorageConfig;
use crate::store::{KeywordStore, RawReplies};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("关键词配置文件不存在：{}", .0.display())]
    NotFound(PathBuf),
    #[error("无权限访问关键词配置文件 {}：{source}", .path.display())]
    PermissionDenied { path: PathBuf, source: io::Error },
    #[error("关键词配置文件 JSON 格式错误：{0}")]
    Parse(#[from] serde_json::Error),
    #[error("读写关键词配置文件 {} 时发生系统错误：{source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl RepositoryError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => RepositoryError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => RepositoryError::PermissionDenied {
                path: path.to_path_buf(),
                source,
            },
            _ => RepositoryError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

// ============================================================================
// Port
// ============================================================================

#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Load persisted rules, or [`default_keywords`] when nothing usable exists.
    async fn load(&self) -> KeywordStore;
    async fn save(&self, store: &KeywordStore) -> Result<(), RepositoryError>;
}

/// Rules used when no rules file exists or it cannot be read.
pub fn default_keywords() -> KeywordStore {
    KeywordStore::from_pairs([
        ("你好", vec!["你好！", "嗨！", "Hello！"]),
        ("再见", vec!["再见！", "拜拜！", "Goodbye！"]),
    ])
}

/// Pick the directory that holds the rules file.
///
/// An explicitly configured (host-provided) directory wins; otherwise the
/// per-user data dir, and as a last resort `./data`.
pub fn resolve_data_dir(configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = configured {
        return dir.to_path_buf();
    }
    match dirs::data_dir() {
        Some(dir) => {
            let dir = dir.join("huiying");
            tracing::info!("未指定数据目录，使用系统数据目录：{}", dir.display());
            dir
        }
        None => {
            tracing::warn!("无法获取系统数据目录，使用备用目录 ./data");
            PathBuf::from("data")
        }
    }
}

// ============================================================================
// JSON file repository
// ============================================================================

/// Stores rules as a pretty-printed JSON object in a single file.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        let dir = resolve_data_dir(storage.data_dir.as_deref());
        Self::new(dir.join(&storage.file_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load without the default fallback.
    pub async fn try_load(&self) -> Result<KeywordStore, RepositoryError> {
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| RepositoryError::from_io(&self.path, e))?;
        let raw: IndexMap<String, RawReplies> = serde_json::from_str(&content)?;
        Ok(KeywordStore::from_raw(raw))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "keywords.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl RuleRepository for JsonFileRepository {
    async fn load(&self) -> KeywordStore {
        match self.try_load().await {
            Ok(store) => {
                tracing::info!("成功加载关键词配置文件：{}", self.path.display());
                store
            }
            Err(RepositoryError::NotFound(_)) => {
                tracing::info!("关键词配置文件不存在，使用默认配置");
                default_keywords()
            }
            Err(e) => {
                tracing::error!("{}，使用默认配置", e);
                default_keywords()
            }
        }
    }

    async fn save(&self, store: &KeywordStore) -> Result<(), RepositoryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RepositoryError::from_io(parent, e))?;
        }

        let mut json = serde_json::to_string_pretty(store)?;
        json.push('\n');

        let tmp = self.temp_path();
        fs::write(&tmp, json)
            .await
            .map_err(|e| RepositoryError::from_io(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| RepositoryError::from_io(&self.path, e))?;

        tracing::info!("关键词配置已保存到：{}", self.path.display());
        Ok(())
    }
}

// ============================================================================
// In-memory repository
// ============================================================================

/// Keeps the "persisted" rules in memory. Useful for embedding the engine
/// without a filesystem, and for exercising save failures.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    stored: Mutex<Option<KeywordStore>>,
    fail_saves: std::sync::atomic::AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(store: KeywordStore) -> Self {
        Self {
            stored: Mutex::new(Some(store)),
            ..Self::default()
        }
    }

    /// Make every subsequent save fail with an I/O error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// The last successfully saved (or seeded) rules.
    pub async fn stored(&self) -> Option<KeywordStore> {
        self.stored.lock().await.clone()
    }
}

#[async_trait]
impl RuleRepository for MemoryRepository {
    async fn load(&self) -> KeywordStore {
        match self.stored.lock().await.clone() {
            Some(store) => store,
            None => {
                tracing::info!("关键词配置不存在，使用默认配置");
                default_keywords()
            }
        }
    }

    async fn save(&self, store: &KeywordStore) -> Result<(), RepositoryError> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(RepositoryError::Io {
                path: PathBuf::from("<memory>"),
                source: io::Error::other("simulated write failure"),
            });
        }
        *self.stored.lock().await = Some(store.clone());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
