//! 领域实体：任务、个人资料、用户身份、会话
//!
//! 字段名与远端表列名保持一致（`tasks` / `profiles`），便于直接 serde 映射。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 临时 ID 前缀（乐观创建时本地生成，服务端确认后被替换）
pub const TEMP_ID_PREFIX: &str = "temp-";

/// 任务记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// 创建一条尚未被服务端确认的临时任务
    pub fn pending(title: impl Into<String>) -> Self {
        Self {
            id: new_temp_id(),
            title: title.into(),
            is_completed: false,
            created_at: Utc::now(),
        }
    }

    /// 是否仍是临时记录
    pub fn is_pending(&self) -> bool {
        is_temp_id(&self.id)
    }
}

/// 生成本地唯一的临时 ID
pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// 插入 `tasks` 表时发送的行（不含 id / created_at，由服务端分配）
#[derive(Debug, Clone, Serialize)]
pub struct NewTaskRow<'a> {
    pub title: &'a str,
    pub is_completed: bool,
    pub user_id: &'a str,
}

/// 任务统计（首页“待办数”与个人页进度环）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    /// 完成百分比，四舍五入；空列表为 0
    pub progress_percent: u8,
}

impl TaskStats {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let total = tasks.len();
        let completed = tasks.iter().filter(|t| t.is_completed).count();
        let progress_percent = if total == 0 {
            0
        } else {
            ((completed as f64 / total as f64) * 100.0).round() as u8
        };
        Self {
            total,
            completed,
            pending: total - completed,
            progress_percent,
        }
    }
}

/// 个人资料（与认证用户一对一）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub full_name: Option<String>,
    pub job_title: Option<String>,
    pub avatar_url: Option<String>,
}

impl Profile {
    /// 合并部分字段（只覆盖 patch 中出现的字段）
    pub fn apply_patch(&mut self, patch: &ProfilePatch) {
        if let Some(full_name) = &patch.full_name {
            self.full_name = full_name.clone();
        }
        if let Some(job_title) = &patch.job_title {
            self.job_title = job_title.clone();
        }
        if let Some(avatar_url) = &patch.avatar_url {
            self.avatar_url = avatar_url.clone();
        }
    }
}

/// 个人资料的部分更新
///
/// 每个字段三态：`None` 不修改，`Some(None)` 置空，`Some(Some(v))` 设值。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<Option<String>>,
}

impl ProfilePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(Some(full_name.into()));
        self
    }

    pub fn with_job_title(mut self, job_title: impl Into<String>) -> Self {
        self.job_title = Some(Some(job_title.into()));
        self
    }

    pub fn with_avatar_url(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(Some(avatar_url.into()));
        self
    }

    pub fn clear_full_name(mut self) -> Self {
        self.full_name = Some(None);
        self
    }

    pub fn clear_job_title(mut self) -> Self {
        self.job_title = Some(None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.job_title.is_none() && self.avatar_url.is_none()
    }
}

/// 当前认证用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// 认证会话（由身份提供方维护，SDK 只观察其有无）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: UserIdentity,
}
