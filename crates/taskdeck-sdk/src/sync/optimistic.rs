//! 乐观变更流程
//!
//! 所有写操作共用同一条路径：
//!
//! 1. `apply`：持写锁修改本地状态，返回回滚快照与远端请求；返回 `None` 表示前置条件不满足
//! 2. `applied`：本地已变更的通知（发事件给视图层）
//! 3. `remote`：调用网关，此时不持有任何锁
//! 4. 成功走 `confirm` 对齐本地状态，失败走 `rollback` 恢复快照
//!
//! 每一步单独持锁，整体不是原子的；同一记录上的并发由 [`super::RecordLocks`] 串行化。

use std::future::Future;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::MutationOutcome;
use crate::error::Result;

pub async fn optimistic_mutation<S, Snap, Req, R, T, AppliedFut, RemoteFut>(
    state: &RwLock<S>,
    apply: impl FnOnce(&mut S) -> Option<(Snap, Req)>,
    applied: impl FnOnce() -> AppliedFut,
    remote: impl FnOnce(Req) -> RemoteFut,
    confirm: impl FnOnce(&mut S, R) -> T,
    rollback: impl FnOnce(&mut S, Snap),
) -> MutationOutcome<T>
where
    AppliedFut: Future<Output = ()>,
    RemoteFut: Future<Output = Result<R>>,
{
    let prepared = {
        let mut guard = state.write().await;
        apply(&mut *guard)
    };
    let Some((snapshot, request)) = prepared else {
        debug!("乐观变更跳过：前置条件不满足");
        return MutationOutcome::Skipped;
    };

    applied().await;

    match remote(request).await {
        Ok(response) => {
            let mut guard = state.write().await;
            MutationOutcome::Confirmed(confirm(&mut *guard, response))
        }
        Err(error) => {
            warn!("远端拒绝，回滚本地变更: {}", error);
            let mut guard = state.write().await;
            rollback(&mut *guard, snapshot);
            MutationOutcome::RolledBack { error }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskdeckSDKError;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_confirm_keeps_applied_state() {
        let state = RwLock::new(vec![1, 2]);
        let notified = AtomicBool::new(false);

        let outcome = optimistic_mutation(
            &state,
            |items: &mut Vec<i32>| {
                let before = items.clone();
                items.push(3);
                Some((before, 3))
            },
            || async { notified.store(true, Ordering::SeqCst) },
            |value| async move { Ok::<_, TaskdeckSDKError>(value * 10) },
            |items: &mut Vec<i32>, confirmed| {
                if let Some(last) = items.last_mut() {
                    *last = confirmed;
                }
                confirmed
            },
            |items: &mut Vec<i32>, before| *items = before,
        )
        .await;

        assert!(matches!(outcome, MutationOutcome::Confirmed(30)));
        assert!(notified.load(Ordering::SeqCst));
        assert_eq!(*state.read().await, vec![1, 2, 30]);
    }

    #[tokio::test]
    async fn test_failure_restores_snapshot() {
        let state = RwLock::new(vec![1, 2]);

        let outcome = optimistic_mutation(
            &state,
            |items: &mut Vec<i32>| {
                let before = items.clone();
                items.clear();
                Some((before, ()))
            },
            || async {},
            |_| async { Err::<(), _>(TaskdeckSDKError::remote("delete", "items", "denied")) },
            |_, _| (),
            |items: &mut Vec<i32>, before| *items = before,
        )
        .await;

        assert!(outcome.is_rolled_back());
        assert_eq!(*state.read().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_guard_failure_skips_remote() {
        let state = RwLock::new(Vec::<i32>::new());
        let called = AtomicBool::new(false);

        let outcome: MutationOutcome<()> = optimistic_mutation(
            &state,
            |_: &mut Vec<i32>| None::<((), ())>,
            || async {},
            |_| async {
                called.store(true, Ordering::SeqCst);
                Ok(())
            },
            |_, _| (),
            |_, _| (),
        )
        .await;

        assert!(outcome.is_skipped());
        assert!(!called.load(Ordering::SeqCst));
    }
}
