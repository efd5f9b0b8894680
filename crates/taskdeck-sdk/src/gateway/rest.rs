//! REST 网关 - 基于 reqwest 访问托管后端
//!
//! 约定（PostgREST / GoTrue / Storage 风格）：
//! - 数据：`{base}/rest/v1/{table}`，过滤条件写成 `column=eq.value`，排序 `order=column.desc`
//! - 存储：`POST {base}/storage/v1/object/{bucket}/{key}`，`x-upsert` 控制覆盖
//! - 认证：`{base}/auth/v1/...`
//!
//! 每个请求都带 `apikey` 头；有会话时 `Authorization` 用 access token，否则用 anon key。

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{Filter, OrderBy, OrderDirection, PutOptions, RemoteGateway, Row};
use crate::auth::{AuthChange, AuthStateEvent, IdentityProvider};
use crate::entities::{Session, UserIdentity};
use crate::error::{Result, TaskdeckSDKError};
use crate::events::now_secs;
use crate::sdk::HttpClientConfig;

/// 登录 / 注册成功时的令牌响应
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: UserIdentity,
}

impl From<TokenResponse> for Session {
    fn from(token: TokenResponse) -> Self {
        Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            user: token.user,
        }
    }
}

/// REST 网关
pub struct RestGateway {
    client: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    auth_events: broadcast::Sender<AuthStateEvent>,
}

impl RestGateway {
    pub fn new(config: &HttpClientConfig, base_url: &str, anon_key: &str) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| TaskdeckSDKError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        let base_url = base_url.trim_end_matches('/').to_string();
        info!("✅ REST 网关已创建 (base_url: {})", base_url);

        let (auth_events, _) = broadcast::channel(64);
        Ok(Self {
            client,
            base_url,
            anon_key: anon_key.to_string(),
            session: RwLock::new(None),
            auth_events,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, key)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    /// 附加 apikey 与 Bearer 头
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .session
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone());
        request.header("apikey", &self.anon_key).bearer_auth(token)
    }

    /// 发送数据 / 存储请求，非 2xx 映射为远端拒绝
    async fn send(&self, request: RequestBuilder, operation: &'static str, target: &str) -> Result<Response> {
        debug!("REST {} {}", operation, target);
        let response = self.authorize(request).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = error_message(response).await;
        error!("❌ {} {} 失败，HTTP 状态码: {}, 错误: {}", operation, target, status, message);
        Err(TaskdeckSDKError::remote(
            operation,
            target,
            format!("HTTP {}: {}", status.as_u16(), message),
        ))
    }

    /// 发送认证请求，非 2xx 映射为认证错误（保留后端原文）
    async fn send_auth(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = error_message(response).await;
        warn!("认证请求失败，HTTP 状态码: {}, 错误: {}", status, message);
        Err(TaskdeckSDKError::Auth(message))
    }

    fn set_session(&self, session: Option<Session>, change: AuthChange) {
        let user = session.as_ref().map(|s| s.user.clone());
        *self.session.write() = session;
        let _ = self.auth_events.send(AuthStateEvent {
            change,
            user,
            timestamp: now_secs(),
        });
    }
}

/// 把过滤条件与排序编码为查询参数
pub fn filter_query(filter: &Filter, order: Option<&OrderBy>) -> Vec<(String, String)> {
    let mut query: Vec<(String, String)> = filter
        .conditions()
        .iter()
        .map(|(column, value)| {
            let encoded = match value {
                Value::Null => "is.null".to_string(),
                Value::String(s) => format!("eq.{}", s),
                other => format!("eq.{}", other),
            };
            (column.clone(), encoded)
        })
        .collect();

    if let Some(order) = order {
        let direction = match order.direction {
            OrderDirection::Asc => "asc",
            OrderDirection::Desc => "desc",
        };
        query.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }
    query
}

/// 提取后端错误信息（兼容 `message` / `msg` / `error_description` / `error`）
fn extract_error_message(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["message", "msg", "error_description", "error"] {
            if let Some(Value::String(message)) = map.get(key) {
                return message.clone();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "无错误信息".to_string()
    } else {
        trimmed.to_string()
    }
}

async fn error_message(response: Response) -> String {
    match response.text().await {
        Ok(body) => extract_error_message(&body),
        Err(_) => "无法读取错误信息".to_string(),
    }
}

/// 注册响应：开启邮箱确认时只有用户、没有令牌
fn parse_sign_up_response(body: Value) -> Result<Option<Session>> {
    if body.get("access_token").is_some() {
        let token: TokenResponse = serde_json::from_value(body)?;
        Ok(Some(token.into()))
    } else {
        Ok(None)
    }
}

#[async_trait]
impl RemoteGateway for RestGateway {
    async fn current_user(&self) -> Option<UserIdentity> {
        self.session.read().as_ref().map(|s| s.user.clone())
    }

    async fn select(&self, table: &str, filter: &Filter, order: Option<&OrderBy>) -> Result<Vec<Row>> {
        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(filter_query(filter, order));

        let request = self.client.get(self.table_url(table)).query(&query);
        let response = self.send(request, "select", table).await?;
        response
            .json::<Vec<Row>>()
            .await
            .map_err(|e| TaskdeckSDKError::Serialization(format!("解析查询结果失败: {}", e)))
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.send(request, "insert", table).await?;

        let mut rows = response
            .json::<Vec<Row>>()
            .await
            .map_err(|e| TaskdeckSDKError::Serialization(format!("解析插入结果失败: {}", e)))?;
        if rows.is_empty() {
            return Err(TaskdeckSDKError::remote("insert", table, "插入后未返回任何行"));
        }
        Ok(rows.remove(0))
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<()> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&filter_query(filter, None))
            .header("Prefer", "return=minimal")
            .json(&patch);
        self.send(request, "update", table).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<()> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&filter_query(filter, None));
        self.send(request, "delete", table).await?;
        Ok(())
    }

    async fn storage_put(&self, bucket: &str, key: &str, bytes: Bytes, options: PutOptions) -> Result<()> {
        let target = format!("{}/{}", bucket, key);
        let content_type = options
            .content_type
            .unwrap_or_else(|| "application/octet-stream".to_string());

        info!("📤 上传对象: {} ({} bytes)", target, bytes.len());
        let request = self
            .client
            .post(self.object_url(bucket, key))
            .header("x-upsert", if options.upsert { "true" } else { "false" })
            .header("Content-Type", content_type)
            .body(bytes);
        self.send(request, "storage_put", &target).await?;
        Ok(())
    }

    fn storage_public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, key)
    }
}

#[async_trait]
impl IdentityProvider for RestGateway {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>> {
        let request = self
            .client
            .post(self.auth_url("signup"))
            .json(&json!({ "email": email, "password": password }));
        let body: Value = self.send_auth(request).await?.json().await?;

        let session = parse_sign_up_response(body)?;
        if let Some(session) = &session {
            self.set_session(Some(session.clone()), AuthChange::SignedIn);
        }
        Ok(session)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let request = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));
        let token: TokenResponse = self.send_auth(request).await?.json().await?;

        let session: Session = token.into();
        self.set_session(Some(session.clone()), AuthChange::SignedIn);
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let signed_in = self.session.read().is_some();
        if signed_in {
            let request = self.client.post(self.auth_url("logout"));
            // 远端失败不影响本地登出
            if let Err(e) = self.send_auth(request).await {
                warn!("远端登出失败，仍清除本地会话: {}", e);
            }
        }
        self.set_session(None, AuthChange::SignedOut);
        Ok(())
    }

    async fn reset_password(&self, email: &str) -> Result<()> {
        let request = self
            .client
            .post(self.auth_url("recover"))
            .json(&json!({ "email": email }));
        self.send_auth(request).await?;
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<()> {
        let session = self
            .session
            .read()
            .clone()
            .ok_or(TaskdeckSDKError::NotAuthenticated)?;

        let request = self
            .client
            .put(self.auth_url("user"))
            .json(&json!({ "password": new_password }));
        self.send_auth(request).await?;

        let _ = self.auth_events.send(AuthStateEvent {
            change: AuthChange::UserUpdated,
            user: Some(session.user),
            timestamp: now_secs(),
        });
        Ok(())
    }

    async fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateEvent> {
        self.auth_events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> RestGateway {
        RestGateway::new(&HttpClientConfig::default(), "https://demo.example.com/", "anon").unwrap()
    }

    #[test]
    fn test_urls() {
        let gateway = gateway();
        assert_eq!(gateway.base_url(), "https://demo.example.com");
        assert_eq!(gateway.table_url("tasks"), "https://demo.example.com/rest/v1/tasks");
        assert_eq!(
            gateway.object_url("avatars", "u1/avatar.png"),
            "https://demo.example.com/storage/v1/object/avatars/u1/avatar.png"
        );
        assert_eq!(
            gateway.storage_public_url("avatars", "u1/avatar.png"),
            "https://demo.example.com/storage/v1/object/public/avatars/u1/avatar.png"
        );
        assert_eq!(gateway.auth_url("signup"), "https://demo.example.com/auth/v1/signup");
    }

    #[test]
    fn test_filter_query_encoding() {
        let filter = Filter::new()
            .eq("user_id", "u1")
            .eq("is_completed", true)
            .eq("position", 3)
            .eq("deleted_at", Value::Null);
        let query = filter_query(&filter, Some(&OrderBy::desc("created_at")));
        assert_eq!(
            query,
            vec![
                ("user_id".to_string(), "eq.u1".to_string()),
                ("is_completed".to_string(), "eq.true".to_string()),
                ("position".to_string(), "eq.3".to_string()),
                ("deleted_at".to_string(), "is.null".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
            ]
        );
        assert!(filter_query(&Filter::new(), None).is_empty());
    }

    #[test]
    fn test_extract_error_message() {
        assert_eq!(
            extract_error_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(
            extract_error_message(r#"{"code":400,"msg":"User already registered"}"#),
            "User already registered"
        );
        assert_eq!(extract_error_message("Bad Gateway"), "Bad Gateway");
        assert_eq!(extract_error_message(""), "无错误信息");
    }

    #[test]
    fn test_parse_sign_up_response() {
        let confirmed = json!({
            "access_token": "jwt",
            "token_type": "bearer",
            "refresh_token": "r",
            "user": {"id": "u1", "email": "ana@example.com", "role": "authenticated"}
        });
        let session = parse_sign_up_response(confirmed).unwrap().unwrap();
        assert_eq!(session.user.id, "u1");
        assert_eq!(session.refresh_token.as_deref(), Some("r"));

        let pending = json!({"id": "u1", "email": "ana@example.com", "confirmation_sent_at": "2024-01-01T00:00:00Z"});
        assert!(parse_sign_up_response(pending).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_starts_without_session() {
        let gateway = gateway();
        assert!(gateway.current_user().await.is_none());
        assert!(matches!(
            gateway.update_password("x").await,
            Err(TaskdeckSDKError::NotAuthenticated)
        ));
    }
}
