//! 统一 SDK 接口 - TaskdeckSDK 主入口
//!
//! 分层结构：
//! ```text
//! TaskdeckSDK (应用上下文)
//!   ├── PreferenceStore (本地偏好)
//!   ├── EventManager (事件系统)
//!   ├── TaskStore / ProfileStore (乐观同步状态)
//!   ├── AuthManager (认证)
//!   └── 会话监听任务（登出时清空 Store，登录时加载）
//! ```
//!
//! 应用启动时构造一次，显式传给各个视图，不使用全局单例。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{AuthChange, AuthManager, AuthStateEvent, IdentityProvider};
use crate::error::{Result, TaskdeckSDKError};
use crate::events::{event_builders, EventManager, SDKEvent};
use crate::gateway::rest::RestGateway;
use crate::gateway::RemoteGateway;
use crate::preferences::PreferenceStore;
use crate::stores::{ProfileStore, TaskStore};
use crate::version::version_summary;

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(60), // 头像上传可能较慢
        }
    }
}

/// 事件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// 事件缓冲区大小
    pub buffer_size: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { buffer_size: 256 }
    }
}

/// Taskdeck SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskdeckConfig {
    /// 数据存储目录（偏好数据库）
    pub data_dir: PathBuf,
    /// 托管后端地址，例如 https://xyz.example.co
    pub backend_url: String,
    /// 匿名 API key
    pub anon_key: String,
    pub tasks_table: String,
    pub profiles_table: String,
    pub avatar_bucket: String,
    /// 登录后自动加载任务与资料
    pub auto_load_on_sign_in: bool,
    /// 事件配置
    pub event_config: EventConfig,
    /// HTTP 客户端配置
    pub http_client_config: HttpClientConfig,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for TaskdeckConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            backend_url: String::new(),
            anon_key: String::new(),
            tasks_table: "tasks".to_string(),
            profiles_table: "profiles".to_string(),
            avatar_bucket: "avatars".to_string(),
            auto_load_on_sign_in: true,
            event_config: EventConfig::default(),
            http_client_config: HttpClientConfig::default(),
            debug_mode: false,
        }
    }
}

/// 获取默认数据目录 ~/.taskdeck/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".taskdeck")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows
        home_dir.join(".taskdeck")
    } else {
        PathBuf::from("./taskdeck_data")
    }
}

impl TaskdeckConfig {
    pub fn builder() -> TaskdeckConfigBuilder {
        TaskdeckConfigBuilder::new()
    }

    /// 通用校验
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(TaskdeckSDKError::Config("数据目录不能为空".to_string()));
        }
        if self.event_config.buffer_size == 0 {
            return Err(TaskdeckSDKError::Config("事件缓冲区大小不能为0".to_string()));
        }
        for (name, value) in [
            ("tasks_table", &self.tasks_table),
            ("profiles_table", &self.profiles_table),
            ("avatar_bucket", &self.avatar_bucket),
        ] {
            if value.trim().is_empty() {
                return Err(TaskdeckSDKError::Config(format!("{} 不能为空", name)));
            }
        }
        Ok(())
    }

    /// 使用 REST 网关时的额外校验
    pub fn validate_backend(&self) -> Result<()> {
        let url = self.backend_url.trim();
        if url.is_empty() {
            return Err(TaskdeckSDKError::Config("后端地址不能为空".to_string()));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TaskdeckSDKError::Config(format!("后端地址必须是 http(s) URL: {}", url)));
        }
        if self.anon_key.trim().is_empty() {
            return Err(TaskdeckSDKError::Config("anon key 不能为空".to_string()));
        }
        Ok(())
    }
}

/// Taskdeck SDK 配置构建器
pub struct TaskdeckConfigBuilder {
    config: TaskdeckConfig,
}

impl Default for TaskdeckConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskdeckConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: TaskdeckConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn backend_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.backend_url = url.into();
        self
    }

    pub fn anon_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.anon_key = key.into();
        self
    }

    pub fn tasks_table<S: Into<String>>(mut self, table: S) -> Self {
        self.config.tasks_table = table.into();
        self
    }

    pub fn profiles_table<S: Into<String>>(mut self, table: S) -> Self {
        self.config.profiles_table = table.into();
        self
    }

    pub fn avatar_bucket<S: Into<String>>(mut self, bucket: S) -> Self {
        self.config.avatar_bucket = bucket.into();
        self
    }

    pub fn auto_load_on_sign_in(mut self, enabled: bool) -> Self {
        self.config.auto_load_on_sign_in = enabled;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_config.buffer_size = size;
        self
    }

    /// 设置 HTTP 客户端配置
    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> TaskdeckConfig {
        self.config
    }
}

/// Taskdeck SDK 主类
pub struct TaskdeckSDK {
    config: TaskdeckConfig,
    event_manager: Arc<EventManager>,
    auth: Arc<AuthManager>,
    tasks: Arc<TaskStore>,
    profile: Arc<ProfileStore>,
    preferences: Arc<PreferenceStore>,
    /// 会话监听任务
    session_watcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl TaskdeckSDK {
    /// 使用 REST 网关初始化（生产路径）
    pub async fn initialize(config: TaskdeckConfig) -> Result<Arc<Self>> {
        config.validate_backend()?;
        let gateway = Arc::new(RestGateway::new(
            &config.http_client_config,
            &config.backend_url,
            &config.anon_key,
        )?);
        Self::initialize_with(config, gateway.clone(), gateway).await
    }

    /// 使用自定义网关与身份提供方初始化
    ///
    /// 初始化顺序：
    /// 1. 本地偏好 → 2. 事件 → 3. Store → 4. 认证 → 5. 会话监听
    pub async fn initialize_with(
        config: TaskdeckConfig,
        gateway: Arc<dyn RemoteGateway>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Arc<Self>> {
        info!("正在初始化 TaskdeckSDK...");
        config.validate()?;
        if config.debug_mode {
            debug!(
                "配置: data_dir={}, backend_url={}, tables=({}, {}), bucket={}",
                config.data_dir.display(),
                config.backend_url,
                config.tasks_table,
                config.profiles_table,
                config.avatar_bucket
            );
        }

        // === 第1层：本地偏好 ===
        let preferences = Arc::new(PreferenceStore::open(&config.data_dir).await?);

        // === 第2层：事件管理器 ===
        let event_manager = Arc::new(EventManager::new(config.event_config.buffer_size));

        // === 第3层：状态 Store ===
        let tasks = Arc::new(TaskStore::new(
            gateway.clone(),
            event_manager.clone(),
            config.tasks_table.clone(),
        ));
        let profile = Arc::new(ProfileStore::new(
            gateway,
            event_manager.clone(),
            config.profiles_table.clone(),
            config.avatar_bucket.clone(),
        ));
        info!("状态 Store 初始化完成");

        // === 第4层：认证 ===
        let auth = Arc::new(AuthManager::new(identity.clone()));

        // === 第5层：会话监听 ===
        // 先订阅再检查现有会话，避免漏掉中间的变更
        let receiver = identity.subscribe();
        let watcher = tokio::spawn(watch_session(
            receiver,
            tasks.clone(),
            profile.clone(),
            event_manager.clone(),
            config.auto_load_on_sign_in,
        ));

        if config.auto_load_on_sign_in && identity.session().await.is_some() {
            info!("检测到已有会话，加载任务与资料");
            tasks.load().await;
            profile.load().await;
        }

        let sdk = Arc::new(Self {
            config,
            event_manager,
            auth,
            tasks,
            profile,
            preferences,
            session_watcher: parking_lot::Mutex::new(Some(watcher)),
            shutting_down: AtomicBool::new(false),
        });

        info!("✅ TaskdeckSDK 初始化完成 ({})", version_summary());
        Ok(sdk)
    }

    pub fn config(&self) -> &TaskdeckConfig {
        &self.config
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    pub fn profile(&self) -> &Arc<ProfileStore> {
        &self.profile
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    pub fn preferences(&self) -> &Arc<PreferenceStore> {
        &self.preferences
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.event_manager
    }

    /// 订阅 SDK 事件
    pub fn subscribe_events(&self) -> broadcast::Receiver<SDKEvent> {
        self.event_manager.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// 关闭 SDK：停止会话监听，刷新偏好
    pub async fn shutdown(&self) -> Result<()> {
        info!("正在关闭 TaskdeckSDK...");
        self.shutting_down.store(true, Ordering::SeqCst);

        if let Some(handle) = self.session_watcher.lock().take() {
            handle.abort();
        }
        self.preferences.flush().await?;

        info!("TaskdeckSDK 关闭完成");
        Ok(())
    }
}

impl Drop for TaskdeckSDK {
    fn drop(&mut self) {
        if let Some(handle) = self.session_watcher.lock().take() {
            handle.abort();
        }
    }
}

/// 会话监听：把认证变更同步到 Store 并转发给视图层
async fn watch_session(
    mut receiver: broadcast::Receiver<AuthStateEvent>,
    tasks: Arc<TaskStore>,
    profile: Arc<ProfileStore>,
    events: Arc<EventManager>,
    auto_load: bool,
) {
    loop {
        match receiver.recv().await {
            Ok(event) => {
                info!("🔐 会话变更: {:?}", event.change);
                match event.change {
                    AuthChange::SignedOut => {
                        tasks.clear().await;
                        profile.clear().await;
                    }
                    AuthChange::SignedIn if auto_load => {
                        tasks.load().await;
                        profile.load().await;
                    }
                    _ => {}
                }
                events
                    .emit(event_builders::auth_state_changed(
                        event.change,
                        event.user.map(|u| u.id),
                    ))
                    .await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("会话事件滞后，丢弃 {} 条", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("身份提供方已关闭，会话监听退出");
                break;
            }
        }
    }
}
