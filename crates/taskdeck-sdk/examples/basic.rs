//! 基础演示：内存网关上走一遍注册、任务增删改、资料修改与回滚
//!
//! 运行：cargo run -p taskdeck-sdk --example basic

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use taskdeck_sdk::gateway::memory::GatewayOp;
use taskdeck_sdk::{MemoryGateway, ProfilePatch, SDKEvent, TaskdeckConfig, TaskdeckSDK};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let data_dir = std::env::temp_dir().join("taskdeck-basic-demo");
    let config = TaskdeckConfig::builder().data_dir(&data_dir).build();

    let gateway = Arc::new(MemoryGateway::new());
    let sdk = TaskdeckSDK::initialize_with(config, gateway.clone(), gateway.clone()).await?;

    // 打印回滚与告警
    let mut events = sdk.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SDKEvent::MutationRolledBack { operation, record_id, reason, .. } => {
                    warn!("↩️ 回滚 {:?} {}: {}", operation, record_id, reason);
                }
                SDKEvent::UserAlert { message, .. } => warn!("🚨 {}", message),
                SDKEvent::AuthStateChanged { change, .. } => info!("🔐 {:?}", change),
                _ => {}
            }
        }
    });

    sdk.auth().sign_up("ana@example.com", "secret").await?;
    // 等会话监听完成首次加载
    tokio::time::sleep(Duration::from_millis(100)).await;

    // === 任务 ===
    for title in ["Buy milk", "Walk dog", "Pay rent"] {
        sdk.tasks().create(title).await?;
    }
    let tasks = sdk.tasks().tasks().await;
    sdk.tasks().toggle(&tasks[0].id).await;

    gateway.fail_next(GatewayOp::Update, 1);
    let outcome = sdk.tasks().toggle(&tasks[1].id).await;
    info!("第二次切换被拒绝: rolled_back={}", outcome.is_rolled_back());

    let stats = sdk.tasks().stats().await;
    info!("📊 {}/{} 已完成，进度 {}%", stats.completed, stats.total, stats.progress_percent);

    let removed = sdk.tasks().delete_completed().await?;
    info!("🧹 删除 {} 条已完成任务，剩余 {}", removed, sdk.tasks().tasks().await.len());

    // === 资料 ===
    sdk.profile()
        .update_fields(ProfilePatch::new().with_full_name("Ana").with_job_title("Engineer"))
        .await?;
    sdk.profile()
        .upload_avatar(Bytes::from_static(b"\x89PNG demo"), "me.png")
        .await?;
    if let Some(profile) = sdk.profile().profile().await {
        info!("👤 {:?} / {:?} / {:?}", profile.full_name, profile.job_title, profile.avatar_url);
    }

    // === 偏好 ===
    let dark = sdk.preferences().toggle_dark_mode().await?;
    info!("🌙 深色模式: {}", dark);

    sdk.auth().sign_out().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!("登出后任务数: {}", sdk.tasks().tasks().await.len());

    sdk.shutdown().await?;
    Ok(())
}
