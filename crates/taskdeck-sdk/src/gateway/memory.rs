//! 内存网关 - 测试与演示用的确定性后端
//!
//! 同时实现 [`RemoteGateway`] 与 [`IdentityProvider`]，行为贴近托管后端：
//! - insert 自动分配 `id`（自增数字字符串）与 `created_at`
//! - 注册时自动创建 `profiles` 行（等价于后端触发器）
//! - 支持故障注入（`fail_next` / `set_failing`）、调用闸门（`close_gate` / `release`）
//!   与按操作类型挂起（`hold` / `release_held`），用于复现网络挂起期间的交错执行

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, Semaphore};
use tracing::debug;
use uuid::Uuid;

use super::{Filter, OrderBy, OrderDirection, PutOptions, RemoteGateway, Row};
use crate::auth::{AuthChange, AuthStateEvent, IdentityProvider};
use crate::entities::{Session, UserIdentity};
use crate::error::{Result, TaskdeckSDKError};
use crate::events::now_secs;

const PUBLIC_BASE_URL: &str = "memory://taskdeck";
const GATE_OPEN_PERMITS: usize = 1 << 16;

/// 网关操作类型（用于故障注入与调用记录）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    Select,
    Insert,
    Update,
    Delete,
    StoragePut,
}

impl GatewayOp {
    fn as_str(&self) -> &'static str {
        match self {
            GatewayOp::Select => "select",
            GatewayOp::Insert => "insert",
            GatewayOp::Update => "update",
            GatewayOp::Delete => "delete",
            GatewayOp::StoragePut => "storage_put",
        }
    }
}

/// 一次网关调用的记录
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCall {
    pub op: GatewayOp,
    /// 表名，或 `bucket/key`
    pub target: String,
    pub filter: Vec<(String, Value)>,
    pub payload: Option<Row>,
}

/// 存储桶中的对象
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

#[derive(Debug)]
struct Account {
    password: String,
    user: UserIdentity,
}

#[derive(Debug, Default)]
struct MemoryState {
    session: Option<Session>,
    accounts: HashMap<String, Account>,
    recovery_requests: Vec<String>,
    tables: HashMap<String, Vec<Row>>,
    objects: HashMap<(String, String), StoredObject>,
    fail_next: HashMap<GatewayOp, usize>,
    failing: HashSet<GatewayOp>,
    calls: Vec<GatewayCall>,
    next_id: u64,
}

/// 内存网关
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    held: Mutex<HashMap<GatewayOp, Arc<Semaphore>>>,
    auth_events: broadcast::Sender<AuthStateEvent>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (auth_events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..Default::default()
            }),
            gate: Mutex::new(None),
            held: Mutex::new(HashMap::new()),
            auth_events,
        }
    }

    /// 直接以某个用户身份建立会话（跳过密码校验，不广播事件）
    pub fn with_user(self, user_id: impl Into<String>) -> Self {
        let user = UserIdentity {
            id: user_id.into(),
            email: None,
        };
        self.state.lock().session = Some(Session {
            access_token: format!("token-{}", Uuid::new_v4()),
            refresh_token: None,
            user,
        });
        self
    }

    /// 清除会话（不广播事件）
    pub fn clear_session(&self) {
        self.state.lock().session = None;
    }

    /// 向表中预置一行
    pub fn seed(&self, table: &str, row: Row) {
        self.state
            .lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// 表的当前内容（插入顺序）
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// 下一个 insert 分配的 id
    pub fn set_next_id(&self, next_id: u64) {
        self.state.lock().next_id = next_id;
    }

    /// 让接下来的 `times` 次 `op` 调用失败
    pub fn fail_next(&self, op: GatewayOp, times: usize) {
        *self.state.lock().fail_next.entry(op).or_insert(0) += times;
    }

    /// 持续失败开关
    pub fn set_failing(&self, op: GatewayOp, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    /// 全部调用记录
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_of(&self, op: GatewayOp) -> Vec<GatewayCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.state
            .lock()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .count()
    }

    pub fn recovery_requests(&self) -> Vec<String> {
        self.state.lock().recovery_requests.clone()
    }

    /// 关闭闸门：之后的数据调用都会挂起，直到 `release` / `open_gate`
    pub fn close_gate(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// 放行 n 个挂起（或将要到来）的调用
    pub fn release(&self, n: usize) {
        if let Some(gate) = self.gate.lock().as_ref() {
            gate.add_permits(n);
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.add_permits(GATE_OPEN_PERMITS);
        }
    }

    /// 只挂起某一类操作，其他操作照常通过
    pub fn hold(&self, op: GatewayOp) {
        self.held.lock().insert(op, Arc::new(Semaphore::new(0)));
    }

    /// 放行 n 个被挂起的该类操作
    pub fn release_held(&self, op: GatewayOp, n: usize) {
        if let Some(gate) = self.held.lock().get(&op) {
            gate.add_permits(n);
        }
    }

    pub fn unhold(&self, op: GatewayOp) {
        if let Some(gate) = self.held.lock().remove(&op) {
            gate.add_permits(GATE_OPEN_PERMITS);
        }
    }

    async fn pass_gate(&self, op: GatewayOp) {
        let gate = self.gate.lock().clone();
        let held = self.held.lock().get(&op).cloned();
        for gate in [gate, held].into_iter().flatten() {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }

    /// 通过闸门、记录调用、判定是否注入失败
    async fn begin(&self, op: GatewayOp, target: &str, filter: Option<&Filter>, payload: Option<&Row>) -> Result<()> {
        self.pass_gate(op).await;

        let mut state = self.state.lock();
        state.calls.push(GatewayCall {
            op,
            target: target.to_string(),
            filter: filter.map(|f| f.conditions().to_vec()).unwrap_or_default(),
            payload: payload.cloned(),
        });

        let injected = match state.fail_next.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => state.failing.contains(&op),
        };
        if injected {
            debug!("memory gateway: 注入失败 {} {}", op.as_str(), target);
            return Err(TaskdeckSDKError::remote(op.as_str(), target, "injected failure"));
        }
        Ok(())
    }

    fn emit_auth(&self, change: AuthChange, user: Option<UserIdentity>) {
        let _ = self.auth_events.send(AuthStateEvent {
            change,
            user,
            timestamp: now_secs(),
        });
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None, Some(_)) | (Some(Value::Null), Some(_)) => Ordering::Less,
        (Some(_), None) | (Some(_), Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn current_user(&self) -> Option<UserIdentity> {
        self.state.lock().session.as_ref().map(|s| s.user.clone())
    }

    async fn select(&self, table: &str, filter: &Filter, order: Option<&OrderBy>) -> Result<Vec<Row>> {
        self.begin(GatewayOp::Select, table, Some(filter), None).await?;

        let state = self.state.lock();
        let mut rows: Vec<Row> = state
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        if let Some(order) = order {
            rows.sort_by(|a, b| {
                let ordering = compare_values(a.get(&order.column), b.get(&order.column));
                match order.direction {
                    OrderDirection::Asc => ordering,
                    OrderDirection::Desc => ordering.reverse(),
                }
            });
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row> {
        self.begin(GatewayOp::Insert, table, None, Some(&row)).await?;

        let mut state = self.state.lock();
        if !row.contains_key("id") {
            let id = state.next_id;
            state.next_id += 1;
            row.insert("id".to_string(), Value::String(id.to_string()));
        }
        if !row.contains_key("created_at") {
            row.insert("created_at".to_string(), Value::String(Utc::now().to_rfc3339()));
        }
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<()> {
        self.begin(GatewayOp::Update, table, Some(filter), Some(&patch)).await?;

        let mut state = self.state.lock();
        if let Some(rows) = state.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| filter.matches(r)) {
                for (key, value) in &patch {
                    row.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<()> {
        self.begin(GatewayOp::Delete, table, Some(filter), None).await?;

        let mut state = self.state.lock();
        if let Some(rows) = state.tables.get_mut(table) {
            rows.retain(|r| !filter.matches(r));
        }
        Ok(())
    }

    async fn storage_put(&self, bucket: &str, key: &str, bytes: Bytes, options: PutOptions) -> Result<()> {
        let target = format!("{}/{}", bucket, key);
        self.begin(GatewayOp::StoragePut, &target, None, None).await?;

        let mut state = self.state.lock();
        let object_key = (bucket.to_string(), key.to_string());
        if !options.upsert && state.objects.contains_key(&object_key) {
            return Err(TaskdeckSDKError::remote("storage_put", target, "The resource already exists"));
        }
        state.objects.insert(
            object_key,
            StoredObject {
                bytes,
                content_type: options.content_type,
            },
        );
        Ok(())
    }

    fn storage_public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", PUBLIC_BASE_URL, bucket, key)
    }
}

#[async_trait]
impl IdentityProvider for MemoryGateway {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>> {
        let session = {
            let mut state = self.state.lock();
            if state.accounts.contains_key(email) {
                return Err(TaskdeckSDKError::Auth("User already registered".to_string()));
            }
            let user = UserIdentity {
                id: Uuid::new_v4().to_string(),
                email: Some(email.to_string()),
            };
            state.accounts.insert(
                email.to_string(),
                Account {
                    password: password.to_string(),
                    user: user.clone(),
                },
            );

            // 后端触发器：为新用户建一行空资料
            let mut profile = Row::new();
            profile.insert("id".to_string(), Value::String(user.id.clone()));
            profile.insert("full_name".to_string(), Value::Null);
            profile.insert("job_title".to_string(), Value::Null);
            profile.insert("avatar_url".to_string(), Value::Null);
            state.tables.entry("profiles".to_string()).or_default().push(profile);

            let session = Session {
                access_token: format!("token-{}", Uuid::new_v4()),
                refresh_token: None,
                user,
            };
            state.session = Some(session.clone());
            session
        };
        self.emit_auth(AuthChange::SignedIn, Some(session.user.clone()));
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let session = {
            let mut state = self.state.lock();
            let user = match state.accounts.get(email) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(TaskdeckSDKError::Auth("Invalid login credentials".to_string())),
            };
            let session = Session {
                access_token: format!("token-{}", Uuid::new_v4()),
                refresh_token: None,
                user,
            };
            state.session = Some(session.clone());
            session
        };
        self.emit_auth(AuthChange::SignedIn, Some(session.user.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        self.state.lock().session = None;
        self.emit_auth(AuthChange::SignedOut, None);
        Ok(())
    }

    async fn reset_password(&self, email: &str) -> Result<()> {
        // 无论邮箱是否存在都返回成功
        self.state.lock().recovery_requests.push(email.to_string());
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<()> {
        let user = {
            let mut state = self.state.lock();
            let user = state
                .session
                .as_ref()
                .map(|s| s.user.clone())
                .ok_or(TaskdeckSDKError::NotAuthenticated)?;
            if let Some(account) = state.accounts.values_mut().find(|a| a.user.id == user.id) {
                account.password = new_password.to_string();
            }
            user
        };
        self.emit_auth(AuthChange::UserUpdated, Some(user));
        Ok(())
    }

    async fn session(&self) -> Option<Session> {
        self.state.lock().session.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateEvent> {
        self.auth_events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::to_row;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_assigns_id_and_timestamp() {
        let gateway = MemoryGateway::new();
        gateway.set_next_id(42);
        let row = gateway
            .insert("tasks", to_row(&json!({"title": "a"})).unwrap())
            .await
            .unwrap();
        assert_eq!(row.get("id"), Some(&json!("42")));
        assert!(row.get("created_at").is_some());
        assert_eq!(gateway.rows("tasks").len(), 1);
    }

    #[tokio::test]
    async fn test_select_filters_and_orders() {
        let gateway = MemoryGateway::new();
        for (id, user, at) in [("1", "u1", "2024-01-01"), ("2", "u2", "2024-01-02"), ("3", "u1", "2024-01-03")] {
            gateway.seed("tasks", to_row(&json!({"id": id, "user_id": user, "created_at": at})).unwrap());
        }
        let rows = gateway
            .select("tasks", &Filter::new().eq("user_id", "u1"), Some(&OrderBy::desc("created_at")))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap().to_string()).collect();
        assert_eq!(ids, vec!["3", "1"]);
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed() {
        let gateway = MemoryGateway::new();
        gateway.fail_next(GatewayOp::Delete, 1);
        assert!(gateway.delete("tasks", &Filter::new()).await.is_err());
        assert!(gateway.delete("tasks", &Filter::new()).await.is_ok());
        assert_eq!(gateway.calls_of(GatewayOp::Delete).len(), 2);
    }

    #[tokio::test]
    async fn test_hold_only_blocks_one_op() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.hold(GatewayOp::Insert);

        let inserting = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.insert("tasks", Row::new()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!inserting.is_finished());

        // 其他操作不受影响
        assert!(gateway.delete("tasks", &Filter::new()).await.is_ok());
        assert!(gateway.calls_of(GatewayOp::Insert).is_empty());

        gateway.release_held(GatewayOp::Insert, 1);
        assert!(inserting.await.unwrap().is_ok());
        assert_eq!(gateway.rows("tasks").len(), 1);
    }

    #[tokio::test]
    async fn test_storage_put_respects_upsert() {
        let gateway = MemoryGateway::new();
        let no_upsert = PutOptions::default();
        gateway.storage_put("avatars", "u1/avatar.png", Bytes::from_static(b"a"), no_upsert.clone()).await.unwrap();
        assert!(gateway
            .storage_put("avatars", "u1/avatar.png", Bytes::from_static(b"b"), no_upsert)
            .await
            .is_err());
        let upsert = PutOptions { upsert: true, content_type: None };
        gateway.storage_put("avatars", "u1/avatar.png", Bytes::from_static(b"c"), upsert).await.unwrap();
        assert_eq!(gateway.object("avatars", "u1/avatar.png").unwrap().bytes, Bytes::from_static(b"c"));
    }

    #[tokio::test]
    async fn test_sign_up_creates_profile_and_session() {
        let gateway = MemoryGateway::new();
        let mut events = gateway.subscribe();
        let session = gateway.sign_up("a@b.c", "secret").await.unwrap().unwrap();
        assert_eq!(gateway.current_user().await.unwrap().id, session.user.id);
        assert_eq!(gateway.rows("profiles").len(), 1);
        assert_eq!(events.recv().await.unwrap().change, AuthChange::SignedIn);

        gateway.sign_out().await.unwrap();
        assert!(gateway.sign_in("a@b.c", "wrong").await.is_err());
        assert!(gateway.sign_in("a@b.c", "secret").await.is_ok());
    }
}
