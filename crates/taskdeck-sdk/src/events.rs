//! 事件系统模块 - 视图层观察 Store 变化的唯一通道
//!
//! 功能包括：
//! - 任务列表 / 个人资料变更通知
//! - 乐观更新回滚通知
//! - 需要用户可见提示的告警（批量删除、头像上传失败）
//! - 认证状态变更
//! - 事件广播和订阅机制

use crate::auth::AuthChange;
use crate::sync::{MutationKind, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// 当前 UNIX 时间戳（秒）
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SDKEvent {
    /// 任务列表发生变化（乐观应用、确认、回滚、加载后都会发出）
    TasksChanged {
        count: usize,
        timestamp: u64,
    },
    /// 新建任务被服务端确认，临时 ID 已替换
    TaskConfirmed {
        task_id: String,
        temp_id: String,
        timestamp: u64,
    },
    /// 已完成任务被批量删除
    CompletedTasksCleared {
        count: usize,
        timestamp: u64,
    },
    /// 乐观更新被回滚
    MutationRolledBack {
        resource: ResourceKind,
        operation: MutationKind,
        record_id: String,
        reason: String,
        timestamp: u64,
    },
    /// 个人资料变化（加载、修改、回滚、清空）
    ProfileChanged {
        profile_id: Option<String>,
        timestamp: u64,
    },
    /// 头像上传并写回资料成功
    AvatarUploaded {
        profile_id: String,
        avatar_url: String,
        timestamp: u64,
    },
    /// 认证状态变更
    AuthStateChanged {
        change: AuthChange,
        user_id: Option<String>,
        timestamp: u64,
    },
    /// 需要阻塞式提示给用户的错误
    UserAlert {
        message: String,
        timestamp: u64,
    },
}

impl SDKEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SDKEvent::TasksChanged { .. } => "tasks_changed",
            SDKEvent::TaskConfirmed { .. } => "task_confirmed",
            SDKEvent::CompletedTasksCleared { .. } => "completed_tasks_cleared",
            SDKEvent::MutationRolledBack { .. } => "mutation_rolled_back",
            SDKEvent::ProfileChanged { .. } => "profile_changed",
            SDKEvent::AvatarUploaded { .. } => "avatar_uploaded",
            SDKEvent::AuthStateChanged { .. } => "auth_state_changed",
            SDKEvent::UserAlert { .. } => "user_alert",
        }
    }

    /// 获取事件关联的记录ID
    pub fn record_id(&self) -> Option<&str> {
        match self {
            SDKEvent::TaskConfirmed { task_id, .. } => Some(task_id),
            SDKEvent::MutationRolledBack { record_id, .. } => Some(record_id),
            SDKEvent::ProfileChanged { profile_id, .. } => profile_id.as_deref(),
            SDKEvent::AvatarUploaded { profile_id, .. } => Some(profile_id),
            _ => None,
        }
    }

    /// 获取事件时间戳
    pub fn timestamp(&self) -> u64 {
        match self {
            SDKEvent::TasksChanged { timestamp, .. } => *timestamp,
            SDKEvent::TaskConfirmed { timestamp, .. } => *timestamp,
            SDKEvent::CompletedTasksCleared { timestamp, .. } => *timestamp,
            SDKEvent::MutationRolledBack { timestamp, .. } => *timestamp,
            SDKEvent::ProfileChanged { timestamp, .. } => *timestamp,
            SDKEvent::AvatarUploaded { timestamp, .. } => *timestamp,
            SDKEvent::AuthStateChanged { timestamp, .. } => *timestamp,
            SDKEvent::UserAlert { timestamp, .. } => *timestamp,
        }
    }
}

/// 事件过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// 事件类型过滤器
    pub event_types: Option<Vec<String>>,
    /// 记录ID过滤器
    pub record_ids: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn with_record_ids(mut self, record_ids: Vec<String>) -> Self {
        self.record_ids = Some(record_ids);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &SDKEvent) -> bool {
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref record_ids) = self.record_ids {
            match event.record_id() {
                Some(id) if record_ids.iter().any(|r| r == id) => {}
                _ => return false,
            }
        }

        true
    }
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&SDKEvent) + Send + Sync>;

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<SDKEvent>,
    /// 事件监听器映射
    listeners: Arc<tokio::sync::RwLock<HashMap<String, Vec<EventListener>>>>,
    /// 事件统计
    stats: Arc<tokio::sync::RwLock<EventStats>>,
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    pub listener_count: usize,
    pub last_event_time: Option<u64>,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            stats: Arc::new(tokio::sync::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: SDKEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats.events_by_type.entry(event.event_type().to_string()).or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败（无 UI 的场景），仅打 debug
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read().await;
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }

        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SDKEvent> {
        self.sender.subscribe()
    }

    /// 订阅特定类型的事件
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 添加事件监听器，`"*"` 监听全部类型
    pub async fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SDKEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().await;
        listeners
            .entry(event_type.to_string())
            .or_insert_with(Vec::new)
            .push(Box::new(listener));

        let mut stats = self.stats.write().await;
        stats.listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    pub async fn clear_listeners(&self) {
        let mut listeners = self.listeners.write().await;
        listeners.clear();

        let mut stats = self.stats.write().await;
        stats.listener_count = 0;

        info!("Cleared all event listeners");
    }

    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 过滤事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<SDKEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<SDKEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件
    pub async fn recv(&mut self) -> Result<SDKEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// 尝试接收事件（非阻塞）
    pub fn try_recv(&mut self) -> Result<SDKEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// 事件生成器 - 辅助函数
pub mod event_builders {
    use super::*;

    pub fn tasks_changed(count: usize) -> SDKEvent {
        SDKEvent::TasksChanged {
            count,
            timestamp: now_secs(),
        }
    }

    pub fn task_confirmed(task_id: impl Into<String>, temp_id: impl Into<String>) -> SDKEvent {
        SDKEvent::TaskConfirmed {
            task_id: task_id.into(),
            temp_id: temp_id.into(),
            timestamp: now_secs(),
        }
    }

    pub fn completed_tasks_cleared(count: usize) -> SDKEvent {
        SDKEvent::CompletedTasksCleared {
            count,
            timestamp: now_secs(),
        }
    }

    pub fn mutation_rolled_back(
        resource: ResourceKind,
        operation: MutationKind,
        record_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> SDKEvent {
        SDKEvent::MutationRolledBack {
            resource,
            operation,
            record_id: record_id.into(),
            reason: reason.into(),
            timestamp: now_secs(),
        }
    }

    pub fn profile_changed(profile_id: Option<String>) -> SDKEvent {
        SDKEvent::ProfileChanged {
            profile_id,
            timestamp: now_secs(),
        }
    }

    pub fn avatar_uploaded(profile_id: impl Into<String>, avatar_url: impl Into<String>) -> SDKEvent {
        SDKEvent::AvatarUploaded {
            profile_id: profile_id.into(),
            avatar_url: avatar_url.into(),
            timestamp: now_secs(),
        }
    }

    pub fn auth_state_changed(change: AuthChange, user_id: Option<String>) -> SDKEvent {
        SDKEvent::AuthStateChanged {
            change,
            user_id,
            timestamp: now_secs(),
        }
    }

    pub fn user_alert(message: impl Into<String>) -> SDKEvent {
        SDKEvent::UserAlert {
            message: message.into(),
            timestamp: now_secs(),
        }
    }
}
