//! 个人资料 Store
//!
//! 单条资料记录 + 头像上传。修改走乐观流程，远端失败时回滚到修改前的资料。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::entities::{Profile, ProfilePatch};
use crate::error::{Result, TaskdeckSDKError};
use crate::events::{event_builders, EventManager};
use crate::gateway::{
    detect_mime_type, file_extension, from_row, to_row, Filter, PutOptions, RemoteGateway, Row,
};
use crate::sync::{
    optimistic_mutation, LoadOutcome, MutationKind, MutationOutcome, RecordLocks, ResourceKind,
};

/// 头像上传失败时给用户的提示
pub const AVATAR_UPLOAD_ALERT: &str = "Error al subir la imagen.";

/// 头像对象 key：`{profile_id}/avatar.{ext}`，每次上传原地覆盖
pub fn avatar_object_key(profile_id: &str, file_name: &str) -> String {
    format!("{}/avatar.{}", profile_id, file_extension(file_name))
}

pub struct ProfileStore {
    gateway: Arc<dyn RemoteGateway>,
    events: Arc<EventManager>,
    table: String,
    bucket: String,
    profile: RwLock<Option<Profile>>,
    /// 进行中的加载 / 上传数
    loading: AtomicUsize,
    locks: RecordLocks,
}

/// 加载标记，drop 时自动复位
struct LoadingMark<'a>(&'a AtomicUsize);

impl<'a> LoadingMark<'a> {
    fn raise(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingMark<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ProfileStore {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        events: Arc<EventManager>,
        table: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            events,
            table: table.into(),
            bucket: bucket.into(),
            profile: RwLock::new(None),
            loading: AtomicUsize::new(0),
            locks: RecordLocks::new(),
        }
    }

    pub async fn profile(&self) -> Option<Profile> {
        self.profile.read().await.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    pub async fn clear(&self) {
        *self.profile.write().await = None;
        self.notify_changed().await;
    }

    /// 加载当前用户的资料；失败保留原值，不重试
    pub async fn load(&self) -> LoadOutcome {
        let _loading = LoadingMark::raise(&self.loading);

        let Some(user) = self.gateway.current_user().await else {
            debug!("无会话，跳过资料加载");
            return LoadOutcome::NoSession;
        };

        let filter = Filter::new().eq("id", user.id.as_str());
        let result = self
            .gateway
            .select(&self.table, &filter, None)
            .await
            .and_then(single_row)
            .and_then(from_row::<Profile>);

        match result {
            Ok(profile) => {
                info!("👤 资料加载完成: {}", profile.id);
                *self.profile.write().await = Some(profile);
                self.notify_changed().await;
                LoadOutcome::Loaded { count: 1 }
            }
            Err(e) => {
                error!("❌ 资料加载失败: user_id={}, {}", user.id, e);
                LoadOutcome::Failed { reason: e.to_string() }
            }
        }
    }

    /// 部分字段更新
    ///
    /// 资料未加载时返回 [`TaskdeckSDKError::ProfileNotLoaded`]；远端失败时回滚。
    pub async fn update_fields(&self, patch: ProfilePatch) -> Result<MutationOutcome<Profile>> {
        let profile_id = self.current_id().await.ok_or(TaskdeckSDKError::ProfileNotLoaded)?;
        let _record = self.locks.acquire(&profile_id).await;

        if patch.is_empty() {
            return self
                .profile()
                .await
                .map(MutationOutcome::Confirmed)
                .ok_or(TaskdeckSDKError::ProfileNotLoaded);
        }

        let row = to_row(&patch)?;
        let outcome = optimistic_mutation(
            &self.profile,
            |slot: &mut Option<Profile>| {
                let profile = slot.as_mut().filter(|p| p.id == profile_id)?;
                let before = profile.clone();
                profile.apply_patch(&patch);
                Some((before, (profile.clone(), row)))
            },
            move || self.notify_changed(),
            move |(updated, row): (Profile, Row)| async move {
                self.gateway
                    .update(&self.table, &Filter::new().eq("id", updated.id.as_str()), row)
                    .await?;
                Ok::<_, TaskdeckSDKError>(updated)
            },
            |_: &mut Option<Profile>, updated: Profile| updated,
            |slot: &mut Option<Profile>, before: Profile| {
                if let Some(profile) = slot.as_mut().filter(|p| p.id == before.id) {
                    *profile = before;
                }
            },
        )
        .await;

        match &outcome {
            MutationOutcome::Confirmed(_) => {
                info!("✅ 资料已更新: {}", profile_id);
            }
            MutationOutcome::RolledBack { error } => {
                warn!("↩️ 资料更新已回滚: id={}, reason={}", profile_id, error);
                self.events
                    .emit(event_builders::mutation_rolled_back(
                        ResourceKind::Profile,
                        MutationKind::UpdateFields,
                        profile_id.as_str(),
                        error.to_string(),
                    ))
                    .await;
                self.notify_changed().await;
            }
            // 排队期间资料被清空（登出）
            MutationOutcome::Skipped => return Err(TaskdeckSDKError::ProfileNotLoaded),
        }
        Ok(outcome)
    }

    /// 上传头像并写回 `avatar_url`
    ///
    /// 上传失败：发出用户告警并返回错误。上传成功但写回失败：对象留在存储中，
    /// 下次上传同 key 覆盖，结果以 `RolledBack` 返回。
    pub async fn upload_avatar(&self, bytes: Bytes, file_name: &str) -> Result<MutationOutcome<Profile>> {
        let profile_id = self.current_id().await.ok_or(TaskdeckSDKError::ProfileNotLoaded)?;
        let _loading = LoadingMark::raise(&self.loading);

        let key = avatar_object_key(&profile_id, file_name);
        let options = PutOptions {
            upsert: true,
            content_type: Some(detect_mime_type(file_name).to_string()),
        };
        info!("🖼️ 上传头像: {}/{} ({} bytes)", self.bucket, key, bytes.len());

        if let Err(e) = self.gateway.storage_put(&self.bucket, &key, bytes, options).await {
            error!("❌ 头像上传失败: {}", e);
            self.events
                .emit(event_builders::user_alert(AVATAR_UPLOAD_ALERT))
                .await;
            return Err(e);
        }

        let avatar_url = self.gateway.storage_public_url(&self.bucket, &key);
        let outcome = self
            .update_fields(ProfilePatch::new().with_avatar_url(avatar_url.clone()))
            .await?;

        match &outcome {
            MutationOutcome::Confirmed(_) => {
                self.events
                    .emit(event_builders::avatar_uploaded(profile_id, avatar_url))
                    .await;
            }
            MutationOutcome::RolledBack { error } => {
                warn!("头像已上传但资料写回失败，对象 {} 暂未被引用: {}", key, error);
            }
            MutationOutcome::Skipped => {}
        }
        Ok(outcome)
    }

    async fn current_id(&self) -> Option<String> {
        self.profile.read().await.as_ref().map(|p| p.id.clone())
    }

    async fn notify_changed(&self) {
        let profile_id = self.current_id().await;
        self.events.emit(event_builders::profile_changed(profile_id)).await;
    }
}

/// 资料查询必须恰好返回一行
fn single_row(mut rows: Vec<Row>) -> Result<Row> {
    if rows.len() == 1 {
        Ok(rows.remove(0))
    } else {
        Err(TaskdeckSDKError::NotFound(format!(
            "期望 1 行资料，实际 {} 行",
            rows.len()
        )))
    }
}
