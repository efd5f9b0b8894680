//! SDK 版本与运行时元信息
//!
//! - **SDK Version** → Cargo.toml（唯一权威源）
//! - **Git SHA / Build Time** → build.rs 中由 vergen 生成

/// SDK semver，来自 Cargo.toml
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// git commit（非 git 工作区构建时为 None）
pub const GIT_SHA: Option<&str> = option_env!("VERGEN_GIT_SHA");

/// build time
pub const BUILD_TIME: Option<&str> = option_env!("VERGEN_BUILD_TIMESTAMP");

/// 版本摘要（用于启动日志）
pub fn version_summary() -> String {
    format!(
        "taskdeck-sdk {} (git: {}, built: {})",
        SDK_VERSION,
        GIT_SHA.unwrap_or("unknown"),
        BUILD_TIME.unwrap_or("unknown"),
    )
}
