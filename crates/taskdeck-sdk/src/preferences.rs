//! 本地偏好存储 - 基于 sled 的界面开关持久化
//!
//! 目前保存两个布尔开关：深色模式、新建任务输入框是否展开。
//! 值以 JSON 布尔存储，缺失时视为 `false`。

use std::path::{Path, PathBuf};

use sled::{Db, Tree};
use tracing::{debug, info};

use crate::error::{Result, TaskdeckSDKError};

const PREFERENCES_DIR: &str = "preferences";
const PREFERENCES_TREE: &str = "ui_preferences";

/// 偏好键
pub mod keys {
    pub const DARK_MODE: &str = "ui.dark_mode";
    pub const COMPOSER_OPEN: &str = "ui.composer_open";
}

/// 偏好存储
#[derive(Debug)]
pub struct PreferenceStore {
    base_path: PathBuf,
    db: Db,
    tree: Tree,
}

impl PreferenceStore {
    /// 打开（或创建）`{base_path}/preferences` 下的数据库
    pub async fn open(base_path: &Path) -> Result<Self> {
        let db_path = base_path.join(PREFERENCES_DIR);
        tokio::fs::create_dir_all(&db_path)
            .await
            .map_err(|e| TaskdeckSDKError::IO(format!("创建偏好存储目录失败: {}", e)))?;

        // 上一个实例可能刚释放文件锁，带退避重试
        const MAX_OPEN_RETRIES: u32 = 5;
        const RETRY_DELAY_MS: u64 = 100;
        let mut attempt = 0;
        let db = loop {
            match sled::open(&db_path) {
                Ok(db) => break db,
                Err(e) => {
                    let msg = e.to_string();
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    attempt += 1;
                    if !is_lock || attempt >= MAX_OPEN_RETRIES {
                        return Err(TaskdeckSDKError::KvStore(format!("打开偏好数据库失败: {}", e)));
                    }
                    debug!("偏好数据库被占用，第 {} 次重试", attempt);
                    tokio::time::sleep(tokio::time::Duration::from_millis(RETRY_DELAY_MS << attempt)).await;
                }
            }
        };

        let tree = db
            .open_tree(PREFERENCES_TREE)
            .map_err(|e| TaskdeckSDKError::KvStore(format!("打开偏好 Tree 失败: {}", e)))?;

        info!("偏好存储已打开: {}", db_path.display());
        Ok(Self {
            base_path: base_path.to_path_buf(),
            db,
            tree,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 读取布尔开关，缺失为 `false`
    pub async fn get_flag(&self, key: &str) -> Result<bool> {
        match self.tree.get(key)? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Ok(false),
        }
    }

    pub async fn set_flag(&self, key: &str, value: bool) -> Result<()> {
        let encoded = serde_json::to_vec(&value)?;
        self.tree.insert(key, encoded)?;
        debug!("偏好已更新: {}={}", key, value);
        Ok(())
    }

    /// 翻转开关并返回新值
    pub async fn toggle_flag(&self, key: &str) -> Result<bool> {
        let value = !self.get_flag(key).await?;
        self.set_flag(key, value).await?;
        Ok(value)
    }

    pub async fn dark_mode(&self) -> Result<bool> {
        self.get_flag(keys::DARK_MODE).await
    }

    pub async fn set_dark_mode(&self, enabled: bool) -> Result<()> {
        self.set_flag(keys::DARK_MODE, enabled).await
    }

    pub async fn toggle_dark_mode(&self) -> Result<bool> {
        self.toggle_flag(keys::DARK_MODE).await
    }

    pub async fn composer_open(&self) -> Result<bool> {
        self.get_flag(keys::COMPOSER_OPEN).await
    }

    pub async fn set_composer_open(&self, open: bool) -> Result<()> {
        self.set_flag(keys::COMPOSER_OPEN, open).await
    }

    pub async fn toggle_composer(&self) -> Result<bool> {
        self.toggle_flag(keys::COMPOSER_OPEN).await
    }

    /// 落盘
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| TaskdeckSDKError::KvStore(format!("刷新偏好数据库失败: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_flags_default_to_false() {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::open(dir.path()).await.unwrap();
        assert!(!store.dark_mode().await.unwrap());
        assert!(!store.composer_open().await.unwrap());
    }

    #[tokio::test]
    async fn test_toggle_flags() {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::open(dir.path()).await.unwrap();
        assert!(store.toggle_dark_mode().await.unwrap());
        assert!(store.dark_mode().await.unwrap());
        assert!(!store.toggle_dark_mode().await.unwrap());

        store.set_composer_open(true).await.unwrap();
        assert!(store.composer_open().await.unwrap());
        assert!(!store.toggle_composer().await.unwrap());
    }

    #[tokio::test]
    async fn test_flags_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = PreferenceStore::open(dir.path()).await.unwrap();
            store.set_dark_mode(true).await.unwrap();
            store.flush().await.unwrap();
        }

        let reopened = PreferenceStore::open(dir.path()).await.unwrap();
        assert!(reopened.dark_mode().await.unwrap());
        assert!(!reopened.composer_open().await.unwrap());
        assert_eq!(reopened.base_path(), dir.path());
    }

    #[tokio::test]
    async fn test_corrupt_value_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::open(dir.path()).await.unwrap();
        store.tree.insert(keys::DARK_MODE, b"not-json".to_vec()).unwrap();
        assert!(store.dark_mode().await.is_err());
    }
}
