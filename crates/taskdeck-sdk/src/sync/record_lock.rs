//! 按记录 ID 排队的锁表
//!
//! 同一条记录上的 toggle / delete / update 依次执行：后来的操作等前一个结算完
//! （确认或回滚）才做本地应用，因此回滚总是恢复它自己看到的值。
//! 不同记录之间互不影响。没有持有者也没有等待者的条目会被清理。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

#[derive(Default)]
pub struct RecordLocks {
    entries: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取记录锁；同一 ID 的调用者按到达顺序排队
    pub async fn acquire(&self, record_id: &str) -> RecordGuard<'_> {
        // 先建守卫：等待中被取消时由它的 drop 清理条目
        let mut guard = RecordGuard {
            locks: self,
            record_id: record_id.to_string(),
            guard: None,
        };
        let entry = {
            let mut entries = self.entries.lock();
            entries
                .entry(record_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        guard.guard = Some(entry.lock_owned().await);
        trace!("record lock acquired: {}", record_id);
        guard
    }

    /// 一次获取多条记录的锁
    ///
    /// 按 ID 排序后逐个获取，多个批量调用之间不会互相等待成环。
    pub async fn acquire_many(&self, record_ids: &[String]) -> Vec<RecordGuard<'_>> {
        let mut ids: Vec<&str> = record_ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.acquire(id).await);
        }
        guards
    }

    /// 当前存活的条目数（持有中或有人等待）
    pub fn active_count(&self) -> usize {
        self.entries.lock().len()
    }
}

/// 记录锁守卫，drop 时释放并按需清理条目（包括等待中被取消的情况）
pub struct RecordGuard<'a> {
    locks: &'a RecordLocks,
    record_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RecordGuard<'_> {
    pub fn record_id(&self) -> &str {
        &self.record_id
    }
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        // 表内的那一份是唯一引用时，说明没有等待者
        let mut entries = self.locks.entries.lock();
        if let Some(entry) = entries.get(&self.record_id) {
            if Arc::strong_count(entry) == 1 {
                entries.remove(&self.record_id);
            }
        }
    }
}
