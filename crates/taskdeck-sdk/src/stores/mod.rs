//! 状态 Store：任务列表与个人资料
//!
//! Store 是本地状态的唯一持有者，视图层只读快照、只通过 Store 的方法写入。

pub mod profile_store;
pub mod task_store;

pub use profile_store::{ProfileStore, AVATAR_UPLOAD_ALERT};
pub use task_store::{TaskStore, DELETE_COMPLETED_ALERT};
