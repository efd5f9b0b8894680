/// 乐观同步模块
///
/// 职责：
/// - 统一的乐观变更流程（本地应用 → 远端调用 → 确认 / 回滚）
/// - 同一记录上的冲突操作串行化（按记录 ID 排队）
/// - 整体替换列表时保留期间确认的新建记录

pub mod confirm_log;
pub mod optimistic;
pub mod record_lock;

pub use confirm_log::{ConfirmLog, Confirmation, LogWindow};
pub use optimistic::optimistic_mutation;
pub use record_lock::{RecordGuard, RecordLocks};

use crate::error::TaskdeckSDKError;

/// 变更作用的资源
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ResourceKind {
    Task,
    Profile,
}

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MutationKind {
    Create,
    Toggle,
    Delete,
    DeleteCompleted,
    UpdateFields,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Toggle => "toggle",
            MutationKind::Delete => "delete",
            MutationKind::DeleteCompleted => "delete_completed",
            MutationKind::UpdateFields => "update_fields",
        }
    }
}

/// 一次乐观变更的结果
#[derive(Debug)]
pub enum MutationOutcome<T> {
    /// 远端确认，本地状态保留（或已按服务端返回值对齐）
    Confirmed(T),
    /// 远端拒绝，本地状态已回滚
    RolledBack { error: TaskdeckSDKError },
    /// 前置条件不满足（无会话 / 记录不存在 / 仍是临时记录），未做任何修改
    Skipped,
}

impl<T> MutationOutcome<T> {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, MutationOutcome::Confirmed(_))
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self, MutationOutcome::RolledBack { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, MutationOutcome::Skipped)
    }

    pub fn confirmed(self) -> Option<T> {
        match self {
            MutationOutcome::Confirmed(value) => Some(value),
            _ => None,
        }
    }
}

/// 加载结果；加载失败不向上抛错，只记录日志并保留旧状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { count: usize },
    NoSession,
    Failed { reason: String },
}
