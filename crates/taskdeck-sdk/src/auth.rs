//! 认证模块
//!
//! [`IdentityProvider`] 是托管后端认证服务的抽象；[`AuthManager`] 在其之上做
//! 输入校验与错误映射，给界面返回可以直接内联展示的错误。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::entities::{Session, UserIdentity};
use crate::error::{Result, TaskdeckSDKError};

/// 后端返回的“凭据错误”原文
const INVALID_LOGIN_CREDENTIALS: &str = "Invalid login credentials";

/// 会话变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthChange {
    SignedIn,
    SignedOut,
    UserUpdated,
    PasswordRecovery,
}

/// 会话变更事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStateEvent {
    pub change: AuthChange,
    /// 变更后的用户；登出时为 None
    pub user: Option<UserIdentity>,
    pub timestamp: u64,
}

/// 身份提供方
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// 注册；需要邮箱确认的后端返回 `Ok(None)`
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    async fn sign_out(&self) -> Result<()>;

    /// 发送重置密码邮件
    async fn reset_password(&self, email: &str) -> Result<()>;

    /// 修改当前用户密码（需要会话）
    async fn update_password(&self, new_password: &str) -> Result<()>;

    async fn session(&self) -> Option<Session>;

    /// 订阅会话变更
    fn subscribe(&self) -> broadcast::Receiver<AuthStateEvent>;
}

/// 认证管理器
pub struct AuthManager {
    provider: Arc<dyn IdentityProvider>,
}

impl AuthManager {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// 注册新账号
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>> {
        let email = validate_credentials(email, password)?;

        let session = self.provider.sign_up(email, password).await.map_err(|e| {
            warn!("注册失败: {}", e);
            map_auth_error(e)
        })?;

        match &session {
            Some(session) => info!("✅ 注册成功: user_id={}", session.user.id),
            None => info!("📧 注册成功，等待邮箱确认: {}", email),
        }
        Ok(session)
    }

    /// 邮箱密码登录
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let email = validate_credentials(email, password)?;

        let session = self.provider.sign_in(email, password).await.map_err(|e| {
            warn!("登录失败: {}", e);
            map_auth_error(e)
        })?;

        info!("✅ 登录成功: user_id={}", session.user.id);
        Ok(session)
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.provider.sign_out().await?;
        info!("👋 已登出");
        Ok(())
    }

    /// 发送重置密码邮件
    pub async fn reset_password(&self, email: &str) -> Result<()> {
        let email = email.trim();
        if email.is_empty() {
            return Err(TaskdeckSDKError::InvalidInput("邮箱不能为空".to_string()));
        }
        self.provider.reset_password(email).await.map_err(map_auth_error)?;
        info!("重置密码邮件已发送: {}", email);
        Ok(())
    }

    pub async fn update_password(&self, new_password: &str) -> Result<()> {
        if new_password.is_empty() {
            return Err(TaskdeckSDKError::InvalidInput("新密码不能为空".to_string()));
        }
        if self.provider.session().await.is_none() {
            return Err(TaskdeckSDKError::NotAuthenticated);
        }
        self.provider.update_password(new_password).await.map_err(map_auth_error)?;
        info!("🔑 密码已更新");
        Ok(())
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.provider.session().await
    }

    pub async fn is_signed_in(&self) -> bool {
        self.provider.session().await.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthStateEvent> {
        self.provider.subscribe()
    }
}

/// 邮箱与密码均不能为空，返回去掉首尾空白的邮箱
fn validate_credentials<'a>(email: &'a str, password: &str) -> Result<&'a str> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(TaskdeckSDKError::InvalidInput(
            "邮箱和密码不能为空".to_string(),
        ));
    }
    Ok(email)
}

/// 把后端原始错误映射为可内联展示的错误
fn map_auth_error(error: TaskdeckSDKError) -> TaskdeckSDKError {
    match error {
        TaskdeckSDKError::Auth(message) if message.contains(INVALID_LOGIN_CREDENTIALS) => {
            TaskdeckSDKError::InvalidCredentials
        }
        TaskdeckSDKError::Remote { message, .. } if message.contains(INVALID_LOGIN_CREDENTIALS) => {
            TaskdeckSDKError::InvalidCredentials
        }
        other => other,
    }
}
