//! 远端数据网关
//!
//! 托管后端（BaaS）客户端的抽象：当前用户解析、按表的增删改查、对象存储。
//! 只有 Store 调用网关，视图层不直接访问。
//!
//! 实现：
//! - [`rest::RestGateway`]：基于 reqwest 的 HTTP 实现
//! - [`memory::MemoryGateway`]：内存实现，支持故障注入（测试 / 演示）

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};

use crate::entities::UserIdentity;
use crate::error::Result;

/// 一行数据（JSON 对象）
pub type Row = Map<String, Value>;

/// 等值过滤条件（多个条件为 AND）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加 `column = value`
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// 判断一行是否满足全部条件
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }
}

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// 排序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// 对象上传选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// 允许覆盖同 key 对象
    pub upsert: bool,
    pub content_type: Option<String>,
}

/// 远端数据网关
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// 解析当前认证用户；None 表示无会话，Store 视为静默 no-op
    async fn current_user(&self) -> Option<UserIdentity>;

    async fn select(&self, table: &str, filter: &Filter, order: Option<&OrderBy>) -> Result<Vec<Row>>;

    /// 插入一行，返回服务端落库后的行（含服务端分配的 id 与时间戳）
    async fn insert(&self, table: &str, row: Row) -> Result<Row>;

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<()>;

    async fn delete(&self, table: &str, filter: &Filter) -> Result<()>;

    async fn storage_put(&self, bucket: &str, key: &str, bytes: Bytes, options: PutOptions) -> Result<()>;

    /// 公开访问 URL（同步计算，无签名 / 过期语义）
    fn storage_public_url(&self, bucket: &str, key: &str) -> String;
}

/// 将可序列化结构转为 Row
pub fn to_row<T: serde::Serialize>(value: &T) -> Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(crate::error::TaskdeckSDKError::Serialization(format!(
            "期望 JSON 对象，实际为: {}",
            other
        ))),
    }
}

/// 将 Row 解析为实体
pub fn from_row<T: serde::de::DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// 根据文件扩展名推断 MIME 类型
pub fn detect_mime_type(file_name: &str) -> &'static str {
    match file_extension(file_name).to_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

/// 取文件名最后一个 `.` 之后的部分；没有 `.` 时返回整个文件名
pub fn file_extension(file_name: &str) -> &str {
    file_name.rsplit('.').next().unwrap_or(file_name)
}
