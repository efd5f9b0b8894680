//! 任务 Store
//!
//! 持有当前用户的任务列表（按创建时间倒序），所有写操作先改本地再调远端，
//! 远端拒绝时回滚。视图层通过 [`SDKEvent::TasksChanged`](crate::events::SDKEvent) 感知变化。
//!
//! 临时记录只会被新建自己的确认 / 回滚或 `clear` 移除：加载与快照回滚整体替换列表时，
//! 在途的临时记录和期间刚确认的新建记录都会被带过去。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::entities::{is_temp_id, NewTaskRow, Task, TaskStats};
use crate::error::{Result, TaskdeckSDKError};
use crate::events::{event_builders, EventManager};
use crate::gateway::{from_row, to_row, Filter, OrderBy, RemoteGateway, Row};
use crate::sync::{
    optimistic_mutation, ConfirmLog, Confirmation, LoadOutcome, LogWindow, MutationKind,
    MutationOutcome, RecordLocks, ResourceKind,
};

/// 批量删除失败时给用户的提示
pub const DELETE_COMPLETED_ALERT: &str = "No se pudieron eliminar las tareas completadas.";

pub struct TaskStore {
    gateway: Arc<dyn RemoteGateway>,
    events: Arc<EventManager>,
    table: String,
    tasks: RwLock<Vec<Task>>,
    locks: RecordLocks,
    /// 新建确认日志，供整体替换列表的操作补回期间确认的记录
    created: ConfirmLog<Task>,
}

impl TaskStore {
    pub fn new(gateway: Arc<dyn RemoteGateway>, events: Arc<EventManager>, table: impl Into<String>) -> Self {
        Self {
            gateway,
            events,
            table: table.into(),
            tasks: RwLock::new(Vec::new()),
            locks: RecordLocks::new(),
            created: ConfirmLog::new(),
        }
    }

    /// 当前列表的快照
    pub async fn tasks(&self) -> Vec<Task> {
        self.tasks.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.iter().find(|t| t.id == id).cloned()
    }

    pub async fn stats(&self) -> TaskStats {
        TaskStats::from_tasks(&self.tasks.read().await)
    }

    /// 清空本地列表（登出时调用）
    pub async fn clear(&self) {
        self.tasks.write().await.clear();
        self.notify_changed().await;
    }

    /// 从远端整体加载当前用户的任务
    ///
    /// 失败只记日志，保留原列表。
    pub async fn load(&self) -> LoadOutcome {
        let Some(user) = self.gateway.current_user().await else {
            debug!("无会话，跳过任务加载");
            return LoadOutcome::NoSession;
        };

        let window = self.created.open();
        let filter = Filter::new().eq("user_id", user.id.as_str());
        let result = self
            .gateway
            .select(&self.table, &filter, Some(&OrderBy::desc("created_at")))
            .await
            .and_then(|rows| rows.into_iter().map(from_row::<Task>).collect::<Result<Vec<_>>>());

        match result {
            Ok(fetched) => {
                let count = fetched.len();
                {
                    let mut tasks = self.tasks.write().await;
                    let merged = merge_local_creates(fetched, &tasks, &window.since_open());
                    *tasks = merged;
                }
                info!("📋 任务加载完成: user_id={}, count={}", user.id, count);
                self.notify_changed().await;
                LoadOutcome::Loaded { count }
            }
            Err(e) => {
                error!("❌ 任务加载失败: {}", e);
                LoadOutcome::Failed { reason: e.to_string() }
            }
        }
    }

    /// 新建任务：先插入一条临时记录到列表头部，服务端确认后原位替换
    ///
    /// 标题原样保存，只在判断是否为空时忽略首尾空白。
    pub async fn create(&self, title: &str) -> Result<MutationOutcome<Task>> {
        if title.trim().is_empty() {
            return Err(TaskdeckSDKError::InvalidInput("任务标题不能为空".to_string()));
        }

        let Some(user) = self.gateway.current_user().await else {
            debug!("无会话，忽略新建任务");
            return Ok(MutationOutcome::Skipped);
        };

        let row = to_row(&NewTaskRow {
            title,
            is_completed: false,
            user_id: &user.id,
        })?;
        let pending = Task::pending(title);
        let temp_id = pending.id.clone();
        debug!("乐观新建任务: temp_id={}", temp_id);

        let outcome = optimistic_mutation(
            &self.tasks,
            |tasks: &mut Vec<Task>| {
                tasks.insert(0, pending);
                Some(((), row))
            },
            move || self.notify_changed(),
            move |row: Row| async move {
                let inserted = self.gateway.insert(&self.table, row).await?;
                from_row::<Task>(inserted)
            },
            |tasks: &mut Vec<Task>, confirmed: Task| {
                reconcile_created(tasks, &temp_id, confirmed.clone());
                self.created.record(&temp_id, confirmed.clone());
                confirmed
            },
            |tasks: &mut Vec<Task>, ()| tasks.retain(|t| t.id != temp_id),
        )
        .await;

        if let MutationOutcome::Confirmed(task) = &outcome {
            info!("✅ 任务已创建: {} -> {}", temp_id, task.id);
            self.events
                .emit(event_builders::task_confirmed(task.id.clone(), temp_id.clone()))
                .await;
        }
        self.report(MutationKind::Create, &temp_id, &outcome).await;
        Ok(outcome)
    }

    /// 切换完成状态
    pub async fn toggle(&self, id: &str) -> MutationOutcome<Task> {
        if is_temp_id(id) {
            debug!("任务尚未确认，忽略切换: {}", id);
            return MutationOutcome::Skipped;
        }

        let _record = self.locks.acquire(id).await;
        let outcome = optimistic_mutation(
            &self.tasks,
            |tasks: &mut Vec<Task>| {
                let task = tasks.iter_mut().find(|t| t.id == id)?;
                let previous = task.is_completed;
                task.is_completed = !previous;
                Some((previous, task.clone()))
            },
            move || self.notify_changed(),
            move |task: Task| async move {
                let mut patch = Row::new();
                patch.insert("is_completed".to_string(), Value::Bool(task.is_completed));
                self.gateway
                    .update(&self.table, &Filter::new().eq("id", task.id.as_str()), patch)
                    .await?;
                Ok::<_, TaskdeckSDKError>(task)
            },
            |_: &mut Vec<Task>, task: Task| task,
            |tasks: &mut Vec<Task>, previous: bool| {
                if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
                    task.is_completed = previous;
                }
            },
        )
        .await;

        self.report(MutationKind::Toggle, id, &outcome).await;
        outcome
    }

    /// 删除单条任务；失败时整体恢复删除前的列表
    pub async fn delete(&self, id: &str) -> MutationOutcome<Task> {
        if is_temp_id(id) {
            debug!("任务尚未确认，忽略删除: {}", id);
            return MutationOutcome::Skipped;
        }

        let _record = self.locks.acquire(id).await;
        let outcome = optimistic_mutation(
            &self.tasks,
            |tasks: &mut Vec<Task>| {
                let position = tasks.iter().position(|t| t.id == id)?;
                let snapshot = (tasks.clone(), self.created.open());
                let removed = tasks.remove(position);
                Some((snapshot, removed))
            },
            move || self.notify_changed(),
            move |removed: Task| async move {
                self.gateway
                    .delete(&self.table, &Filter::new().eq("id", removed.id.as_str()))
                    .await?;
                Ok::<_, TaskdeckSDKError>(removed)
            },
            |_: &mut Vec<Task>, removed: Task| removed,
            |tasks: &mut Vec<Task>, (snapshot, window)| {
                restore_snapshot(tasks, snapshot, &window)
            },
        )
        .await;

        self.report(MutationKind::Delete, id, &outcome).await;
        outcome
    }

    /// 删除当前用户所有已完成任务，返回删除条数
    ///
    /// 远端按 `is_completed` 过滤删除，所以先按 ID 顺序拿到列表中所有已确认记录的锁，
    /// 等这些记录上的在途操作都结算后再移除。
    /// 失败时恢复快照、发出用户告警并把错误返回给调用方。
    pub async fn delete_completed(&self) -> Result<usize> {
        let Some(user) = self.gateway.current_user().await else {
            debug!("无会话，忽略批量删除");
            return Ok(0);
        };
        let user_id = user.id;

        let mut locked_ids = self.settled_ids().await;
        let outcome = loop {
            let _records = self.locks.acquire_many(&locked_ids).await;
            let filter = Filter::new()
                .eq("user_id", user_id.as_str())
                .eq("is_completed", true);

            let outcome = optimistic_mutation(
                &self.tasks,
                |tasks: &mut Vec<Task>| {
                    // 等锁期间有新确认的记录：重新加锁
                    let covered = tasks
                        .iter()
                        .filter(|t| !t.is_pending())
                        .all(|t| locked_ids.contains(&t.id));
                    if !covered {
                        return None;
                    }
                    let snapshot = (tasks.clone(), self.created.open());
                    tasks.retain(|t| !t.is_completed);
                    let removed = snapshot.0.len() - tasks.len();
                    Some((snapshot, removed))
                },
                move || self.notify_changed(),
                move |removed: usize| async move {
                    self.gateway.delete(&self.table, &filter).await?;
                    Ok::<_, TaskdeckSDKError>(removed)
                },
                |_: &mut Vec<Task>, removed: usize| removed,
                |tasks: &mut Vec<Task>, (snapshot, window)| {
                    restore_snapshot(tasks, snapshot, &window)
                },
            )
            .await;

            if !outcome.is_skipped() {
                break outcome;
            }
            let settled = self.settled_ids().await;
            debug!("等锁期间列表变化，重新加锁: {} -> {}", locked_ids.len(), settled.len());
            locked_ids.extend(settled);
        };

        match outcome {
            MutationOutcome::Confirmed(removed) => {
                info!("🧹 已删除 {} 条已完成任务", removed);
                self.events
                    .emit(event_builders::completed_tasks_cleared(removed))
                    .await;
                self.notify_changed().await;
                Ok::<_, TaskdeckSDKError>(removed)
            }
            MutationOutcome::RolledBack { error } => {
                error!("❌ 批量删除已完成任务失败: {}", error);
                self.events
                    .emit(event_builders::mutation_rolled_back(
                        ResourceKind::Task,
                        MutationKind::DeleteCompleted,
                        user_id.as_str(),
                        error.to_string(),
                    ))
                    .await;
                self.events
                    .emit(event_builders::user_alert(DELETE_COMPLETED_ALERT))
                    .await;
                self.notify_changed().await;
                Err(error)
            }
            MutationOutcome::Skipped => Ok(0),
        }
    }

    /// 已被服务端确认的记录 ID
    async fn settled_ids(&self) -> Vec<String> {
        self.tasks
            .read()
            .await
            .iter()
            .filter(|t| !t.is_pending())
            .map(|t| t.id.clone())
            .collect()
    }

    async fn report(&self, kind: MutationKind, record_id: &str, outcome: &MutationOutcome<Task>) {
        match outcome {
            MutationOutcome::Confirmed(_) => {
                debug!("任务{}已确认: {}", kind.as_str(), record_id);
                self.notify_changed().await;
            }
            MutationOutcome::RolledBack { error } => {
                warn!("↩️ 任务{}已回滚: id={}, reason={}", kind.as_str(), record_id, error);
                self.events
                    .emit(event_builders::mutation_rolled_back(
                        ResourceKind::Task,
                        kind,
                        record_id,
                        error.to_string(),
                    ))
                    .await;
                self.notify_changed().await;
            }
            MutationOutcome::Skipped => {
                debug!("任务{}跳过: {}", kind.as_str(), record_id);
            }
        }
    }

    async fn notify_changed(&self) {
        let count = self.tasks.read().await.len();
        self.events.emit(event_builders::tasks_changed(count)).await;
    }
}

/// 用服务端行替换临时记录
///
/// 列表中已存在同 id 记录时只移除临时记录。临时记录不在列表里只可能是
/// 期间被 `clear`（登出），此时不再插入。
fn reconcile_created(tasks: &mut Vec<Task>, temp_id: &str, confirmed: Task) {
    let already_present = tasks.iter().any(|t| t.id == confirmed.id);
    match tasks.iter().position(|t| t.id == temp_id) {
        Some(position) if !already_present => tasks[position] = confirmed,
        Some(position) => {
            tasks.remove(position);
        }
        None => debug!("临时记录已被清空，丢弃确认结果: {}", temp_id),
    }
}

/// 用 `base` 整体替换列表，同时带上本地的新建记录
///
/// - 仍为临时 ID 的记录（新建在途）放到头部
/// - 窗口期间确认的新建：`base` 中有对应临时记录则原位替换，否则放到头部；
///   本地已不存在（随后被删除）的不再带回
/// - 已确认过的临时 ID 不会留在结果里
fn merge_local_creates(base: Vec<Task>, current: &[Task], confirmed: &[Confirmation<Task>]) -> Vec<Task> {
    let mut merged = base;
    let mut carried = Vec::new();

    for task in current {
        if merged.iter().any(|t| t.id == task.id) {
            continue;
        }
        if task.is_pending() {
            carried.push(task.clone());
            continue;
        }
        let Some(confirmation) = confirmed.iter().find(|c| c.record.id == task.id) else {
            continue;
        };
        match merged.iter().position(|t| t.id == confirmation.temp_id) {
            Some(position) => merged[position] = task.clone(),
            None => carried.push(task.clone()),
        }
    }

    merged.retain(|t| !confirmed.iter().any(|c| c.temp_id == t.id));
    merged.splice(0..0, carried);
    merged
}

/// 快照回滚：恢复快照，只补回快照之后的新建记录
fn restore_snapshot(tasks: &mut Vec<Task>, snapshot: Vec<Task>, window: &LogWindow<'_, Task>) {
    let merged = merge_local_creates(snapshot, tasks, &window.since_open());
    *tasks = merged;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TEMP_ID_PREFIX;
    use crate::events::SDKEvent;
    use crate::gateway::memory::{GatewayOp, MemoryGateway};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn task_row(id: &str, user_id: &str, title: &str, done: bool, created_at: &str) -> Row {
        to_row(&json!({
            "id": id,
            "user_id": user_id,
            "title": title,
            "is_completed": done,
            "created_at": created_at,
        }))
        .unwrap()
    }

    fn store(gateway: &Arc<MemoryGateway>) -> Arc<TaskStore> {
        Arc::new(TaskStore::new(
            gateway.clone(),
            Arc::new(EventManager::new(256)),
            "tasks",
        ))
    }

    fn drain(receiver: &mut broadcast::Receiver<SDKEvent>) -> Vec<SDKEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    async fn seeded() -> (Arc<MemoryGateway>, Arc<TaskStore>) {
        let gateway = Arc::new(MemoryGateway::new().with_user("u1"));
        gateway.seed("tasks", task_row("1", "u1", "Walk dog", false, "2024-01-01T10:00:00Z"));
        gateway.seed("tasks", task_row("2", "u1", "Pay rent", true, "2024-01-02T10:00:00Z"));
        gateway.seed("tasks", task_row("3", "u2", "Other user", true, "2024-01-03T10:00:00Z"));
        let store = store(&gateway);
        assert_eq!(store.load().await, LoadOutcome::Loaded { count: 2 });
        (gateway, store)
    }

    #[tokio::test]
    async fn test_load_filters_by_user_and_orders_newest_first() {
        let (_gateway, store) = seeded().await;
        let tasks = store.tasks().await;
        assert_eq!(ids(&tasks), vec!["2", "1"]);
        assert!(tasks[0].is_completed);
    }

    #[tokio::test]
    async fn test_load_failure_keeps_previous_list() {
        let (gateway, store) = seeded().await;
        gateway.fail_next(GatewayOp::Select, 1);
        assert!(matches!(store.load().await, LoadOutcome::Failed { .. }));
        assert_eq!(ids(&store.tasks().await), vec!["2", "1"]);
    }

    #[tokio::test]
    async fn test_load_without_session_is_noop() {
        let gateway = Arc::new(MemoryGateway::new());
        let store = store(&gateway);
        assert_eq!(store.load().await, LoadOutcome::NoSession);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_is_replaced_by_server_record() {
        let gateway = Arc::new(MemoryGateway::new().with_user("u1"));
        gateway.set_next_id(42);
        let store = store(&gateway);
        let mut events = store.events.subscribe();

        let outcome = store.create("Buy milk").await.unwrap();
        let created = outcome.confirmed().unwrap();
        assert_eq!(created.id, "42");

        let tasks = store.tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "42");
        assert_eq!(tasks[0].title, "Buy milk");
        assert!(!tasks[0].is_completed);

        // 临时 ID 从未发送到远端
        let insert = &gateway.calls_of(GatewayOp::Insert)[0];
        let payload = insert.payload.as_ref().unwrap();
        assert!(payload.get("id").is_none());
        assert_eq!(payload.get("user_id"), Some(&json!("u1")));

        let types: Vec<_> = drain(&mut events).iter().map(|e| e.event_type()).collect();
        assert!(types.contains(&"task_confirmed"));
        assert!(types.contains(&"tasks_changed"));
    }

    #[tokio::test]
    async fn test_create_keeps_position_of_temporary_record() {
        let (gateway, store) = seeded().await;
        gateway.set_next_id(42);
        gateway.close_gate();

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.create("Buy milk").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let during = store.tasks().await;
        assert_eq!(during.len(), 3);
        assert!(during[0].id.starts_with(TEMP_ID_PREFIX));

        gateway.open_gate();
        pending.await.unwrap().unwrap();

        let after = store.tasks().await;
        assert_eq!(ids(&after), vec!["42", "2", "1"]);
        assert!(after.iter().all(|t| !t.is_pending()));
    }

    #[tokio::test]
    async fn test_create_rollback_restores_list() {
        let (gateway, store) = seeded().await;
        let before = store.tasks().await;
        let mut events = store.events.subscribe();
        gateway.fail_next(GatewayOp::Insert, 1);

        let outcome = store.create("Buy milk").await.unwrap();
        assert!(outcome.is_rolled_back());
        assert_eq!(store.tasks().await, before);

        let rolled_back = drain(&mut events)
            .into_iter()
            .any(|e| matches!(e, SDKEvent::MutationRolledBack { operation: MutationKind::Create, .. }));
        assert!(rolled_back);
    }

    #[tokio::test]
    async fn test_create_guards() {
        let gateway = Arc::new(MemoryGateway::new());
        let store = store(&gateway);
        assert!(matches!(
            store.create("   ").await,
            Err(TaskdeckSDKError::InvalidInput(_))
        ));
        assert!(store.create("Buy milk").await.unwrap().is_skipped());
        assert!(store.tasks().await.is_empty());
        assert!(gateway.calls_of(GatewayOp::Insert).is_empty());
    }

    #[tokio::test]
    async fn test_toggle_rejected_restores_flag() {
        let gateway = Arc::new(MemoryGateway::new().with_user("u1"));
        gateway.seed("tasks", task_row("1", "u1", "Walk dog", false, "2024-01-01T10:00:00Z"));
        let store = store(&gateway);
        store.load().await;
        gateway.fail_next(GatewayOp::Update, 1);

        assert!(store.toggle("1").await.is_rolled_back());
        let task = store.get("1").await.unwrap();
        assert!(!task.is_completed);
    }

    #[tokio::test]
    async fn test_toggle_confirmed_updates_remote() {
        let (gateway, store) = seeded().await;
        let toggled = store.toggle("1").await.confirmed().unwrap();
        assert!(toggled.is_completed);
        assert!(store.get("1").await.unwrap().is_completed);

        let remote = gateway.rows("tasks");
        let row = remote.iter().find(|r| r["id"] == json!("1")).unwrap();
        assert_eq!(row["is_completed"], json!(true));
    }

    #[tokio::test]
    async fn test_toggle_unknown_or_pending_is_skipped() {
        let (gateway, store) = seeded().await;
        assert!(store.toggle("999").await.is_skipped());
        assert!(store.toggle("temp-abc").await.is_skipped());
        assert!(store.delete("999").await.is_skipped());
        assert!(gateway.calls_of(GatewayOp::Update).is_empty());
        assert!(gateway.calls_of(GatewayOp::Delete).is_empty());
    }

    #[tokio::test]
    async fn test_serialized_toggles_settle_to_remote_truth() {
        let gateway = Arc::new(MemoryGateway::new().with_user("u1"));
        gateway.seed("tasks", task_row("1", "u1", "Walk dog", false, "2024-01-01T10:00:00Z"));
        let store = store(&gateway);
        store.load().await;
        gateway.close_gate();

        let first = {
            let store = store.clone();
            tokio::spawn(async move { store.toggle("1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = {
            let store = store.clone();
            tokio::spawn(async move { store.toggle("1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // 第二次切换排队中，本地只应用了第一次
        assert!(store.get("1").await.unwrap().is_completed);
        assert_eq!(gateway.calls_of(GatewayOp::Update).len(), 0);

        gateway.release(1);
        assert!(first.await.unwrap().is_confirmed());

        gateway.fail_next(GatewayOp::Update, 1);
        gateway.release(1);
        assert!(second.await.unwrap().is_rolled_back());

        assert!(store.get("1").await.unwrap().is_completed);
        let remote = gateway.rows("tasks");
        assert_eq!(remote[0]["is_completed"], json!(true));
    }

    #[tokio::test]
    async fn test_delete_rollback_restores_snapshot() {
        let (gateway, store) = seeded().await;
        let before = store.tasks().await;
        gateway.fail_next(GatewayOp::Delete, 1);

        assert!(store.delete("1").await.is_rolled_back());
        assert_eq!(store.tasks().await, before);

        let removed = store.delete("1").await.confirmed().unwrap();
        assert_eq!(removed.id, "1");
        assert_eq!(ids(&store.tasks().await), vec!["2"]);
        assert!(gateway.rows("tasks").iter().all(|r| r["id"] != json!("1")));
    }

    #[tokio::test]
    async fn test_delete_completed_only_touches_current_user() {
        let (gateway, store) = seeded().await;
        let mut events = store.events.subscribe();

        assert_eq!(store.delete_completed().await.unwrap(), 1);

        let tasks = store.tasks().await;
        assert!(tasks.iter().all(|t| !t.is_completed));
        assert_eq!(ids(&tasks), vec!["1"]);

        let delete = &gateway.calls_of(GatewayOp::Delete)[0];
        assert_eq!(
            delete.filter,
            vec![
                ("user_id".to_string(), json!("u1")),
                ("is_completed".to_string(), json!(true)),
            ]
        );
        // 其他用户的已完成任务仍在
        assert!(gateway.rows("tasks").iter().any(|r| r["id"] == json!("3")));

        let types: Vec<_> = drain(&mut events).iter().map(|e| e.event_type()).collect();
        assert!(types.contains(&"completed_tasks_cleared"));
    }

    #[tokio::test]
    async fn test_delete_completed_failure_alerts_and_restores() {
        let (gateway, store) = seeded().await;
        let before = store.tasks().await;
        let mut events = store.events.subscribe();
        gateway.fail_next(GatewayOp::Delete, 1);

        let err = store.delete_completed().await.unwrap_err();
        assert!(err.is_remote_rejection());
        assert_eq!(store.tasks().await, before);

        let alert = drain(&mut events).into_iter().find_map(|e| match e {
            SDKEvent::UserAlert { message, .. } => Some(message),
            _ => None,
        });
        assert_eq!(alert.as_deref(), Some(DELETE_COMPLETED_ALERT));
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let (_gateway, store) = seeded().await;
        let stats = store.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.progress_percent, 50);

        store.clear().await;
        assert!(store.tasks().await.is_empty());
        assert_eq!(store.stats().await, TaskStats::default());
    }

    #[tokio::test]
    async fn test_create_keeps_title_as_typed() {
        let gateway = Arc::new(MemoryGateway::new().with_user("u1"));
        let store = store(&gateway);

        let created = store.create("  Buy milk ").await.unwrap().confirmed().unwrap();
        assert_eq!(created.title, "  Buy milk ");

        let insert = &gateway.calls_of(GatewayOp::Insert)[0];
        assert_eq!(insert.payload.as_ref().unwrap()["title"], json!("  Buy milk "));
    }

    #[tokio::test]
    async fn test_load_during_create_keeps_confirmed_record() {
        let (gateway, store) = seeded().await;
        gateway.set_next_id(42);
        gateway.close_gate();

        let loading = {
            let store = store.clone();
            tokio::spawn(async move { store.load().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let creating = {
            let store = store.clone();
            tokio::spawn(async move { store.create("Buy milk").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // 加载先拿到远端结果（此时还没有新记录）并整体替换列表
        gateway.release(1);
        assert_eq!(loading.await.unwrap(), LoadOutcome::Loaded { count: 2 });
        let during = store.tasks().await;
        assert_eq!(during.len(), 3);
        assert!(during[0].is_pending());

        gateway.release(1);
        let created = creating.await.unwrap().unwrap().confirmed().unwrap();
        assert_eq!(created.id, "42");
        assert_eq!(ids(&store.tasks().await), vec!["42", "2", "1"]);
        assert!(gateway.rows("tasks").iter().any(|r| r["id"] == json!("42")));
    }

    #[tokio::test]
    async fn test_delete_rollback_keeps_pending_create_from_snapshot() {
        let (gateway, store) = seeded().await;
        gateway.set_next_id(42);
        gateway.hold(GatewayOp::Insert);

        let creating = {
            let store = store.clone();
            tokio::spawn(async move { store.create("Buy milk").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let snapshot = store.tasks().await;
        assert!(snapshot[0].is_pending());

        gateway.fail_next(GatewayOp::Delete, 1);
        assert!(store.delete("1").await.is_rolled_back());
        assert_eq!(store.tasks().await, snapshot);

        // 新建随后确认：原位替换快照里恢复出来的临时记录
        gateway.release_held(GatewayOp::Insert, 1);
        creating.await.unwrap().unwrap().confirmed().unwrap();
        assert_eq!(ids(&store.tasks().await), vec!["42", "2", "1"]);
    }

    #[tokio::test]
    async fn test_create_confirmed_during_failed_delete_survives_rollback() {
        let (gateway, store) = seeded().await;
        gateway.set_next_id(42);
        gateway.hold(GatewayOp::Insert);
        gateway.hold(GatewayOp::Delete);

        let creating = {
            let store = store.clone();
            tokio::spawn(async move { store.create("Buy milk").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let deleting = {
            let store = store.clone();
            tokio::spawn(async move { store.delete("1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        gateway.release_held(GatewayOp::Insert, 1);
        creating.await.unwrap().unwrap().confirmed().unwrap();
        assert_eq!(ids(&store.tasks().await), vec!["42", "2"]);

        gateway.fail_next(GatewayOp::Delete, 1);
        gateway.release_held(GatewayOp::Delete, 1);
        assert!(deleting.await.unwrap().is_rolled_back());

        // 快照里的临时记录被替换为已确认的记录
        let tasks = store.tasks().await;
        assert_eq!(ids(&tasks), vec!["42", "2", "1"]);
        assert!(tasks.iter().all(|t| !t.is_pending()));
        assert_eq!(store.created.retained(), 0);
    }

    #[tokio::test]
    async fn test_delete_completed_waits_for_in_flight_toggle() {
        let (gateway, store) = seeded().await;
        gateway.hold(GatewayOp::Update);

        // "2" 正在被取消完成
        let toggling = {
            let store = store.clone();
            tokio::spawn(async move { store.toggle("2").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let clearing = {
            let store = store.clone();
            tokio::spawn(async move { store.delete_completed().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!clearing.is_finished());
        assert!(gateway.calls_of(GatewayOp::Delete).is_empty());

        gateway.release_held(GatewayOp::Update, 1);
        assert!(toggling.await.unwrap().is_confirmed());
        assert_eq!(clearing.await.unwrap().unwrap(), 0);

        assert_eq!(ids(&store.tasks().await), vec!["2", "1"]);
        let remote = gateway.rows("tasks");
        let row = remote.iter().find(|r| r["id"] == json!("2")).unwrap();
        assert_eq!(row["is_completed"], json!(false));
        assert_eq!(store.locks.active_count(), 0);
    }

    #[test]
    fn test_merge_local_creates() {
        let now = chrono::Utc::now();
        let make = |id: &str| Task {
            id: id.to_string(),
            title: id.to_string(),
            is_completed: false,
            created_at: now,
        };
        let confirmed = vec![Confirmation {
            temp_id: "temp-x".to_string(),
            record: make("42"),
        }];

        // 远端结果早于插入：带上本地已确认的记录和在途的临时记录
        let current = vec![make("temp-y"), make("42"), make("1")];
        let merged = merge_local_creates(vec![make("1")], &current, &confirmed);
        assert_eq!(ids(&merged), vec!["temp-y", "42", "1"]);

        // 远端结果已包含新记录：不重复
        let merged = merge_local_creates(vec![make("42"), make("1")], &current, &confirmed);
        assert_eq!(ids(&merged), vec!["temp-y", "42", "1"]);

        // 确认后又被删除：不带回，快照里的临时记录也去掉
        let current = vec![make("1")];
        let merged = merge_local_creates(vec![make("temp-x"), make("1")], &current, &confirmed);
        assert_eq!(ids(&merged), vec!["1"]);
    }

    #[test]
    fn test_reconcile_created_edge_cases() {
        let now = chrono::Utc::now();
        let make = |id: &str| Task {
            id: id.to_string(),
            title: id.to_string(),
            is_completed: false,
            created_at: now,
        };

        // 列表已被清空后又加载：不插入
        let mut tasks = vec![make("1")];
        reconcile_created(&mut tasks, "temp-x", make("42"));
        assert_eq!(ids(&tasks), vec!["1"]);

        // 服务端记录已存在：只移除临时记录
        let mut tasks = vec![make("temp-x"), make("42")];
        reconcile_created(&mut tasks, "temp-x", make("42"));
        assert_eq!(ids(&tasks), vec!["42"]);
    }
}
