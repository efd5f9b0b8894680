//! Taskdeck SDK - 任务与个人资料的乐观同步客户端
//!
//! 本 SDK 提供：
//! - 📋 任务 Store：加载、新建、切换完成、删除、批量删除已完成、统计
//! - 👤 资料 Store：加载、部分字段更新、头像上传
//! - ⚡ 乐观更新：本地先生效，远端失败自动回滚
//! - 🔒 同一记录上的操作按到达顺序串行执行
//! - 🔐 认证：注册、登录、登出、重置密码、修改密码
//! - ⚙️ 事件系统：视图层订阅列表变化、回滚与告警
//! - 💾 本地偏好：深色模式、输入框状态（sled）
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use taskdeck_sdk::{TaskdeckConfig, TaskdeckSDK};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TaskdeckConfig::builder()
//!         .data_dir("/path/to/data")
//!         .backend_url("https://xyz.example.co")
//!         .anon_key("public-anon-key")
//!         .build();
//!
//!     let sdk = TaskdeckSDK::initialize(config).await?;
//!
//!     sdk.auth().sign_in("ana@example.com", "secret").await?;
//!     sdk.tasks().create("Buy milk").await?;
//!     println!("待办: {}", sdk.tasks().stats().await.pending);
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod auth;
pub mod entities;
pub mod error;
pub mod events;
pub mod gateway;
pub mod preferences;
pub mod sdk;
pub mod stores;
pub mod sync;
pub mod version;

// 重新导出核心类型，方便使用
pub use auth::{AuthChange, AuthManager, AuthStateEvent, IdentityProvider};
pub use entities::{Profile, ProfilePatch, Session, Task, TaskStats, UserIdentity};
pub use error::{Result, TaskdeckSDKError};
pub use events::{EventFilter, EventManager, SDKEvent};
pub use gateway::memory::MemoryGateway;
pub use gateway::rest::RestGateway;
pub use gateway::{Filter, OrderBy, PutOptions, RemoteGateway, Row};
pub use preferences::PreferenceStore;
pub use sdk::{EventConfig, HttpClientConfig, TaskdeckConfig, TaskdeckConfigBuilder, TaskdeckSDK};
pub use stores::{ProfileStore, TaskStore};
pub use sync::{LoadOutcome, MutationKind, MutationOutcome, ResourceKind};
pub use version::{version_summary, SDK_VERSION};
