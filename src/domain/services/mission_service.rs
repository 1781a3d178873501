// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::MissionSettings;
use crate::domain::models::mission::{Mission, MissionStatus};
use crate::domain::repositories::mission_store::{MissionStore, MissionStoreError};
use crate::utils::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitStats};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 任务进度追踪器
///
/// 次要的可观测性组件。所有操作都是尽力而为：存储失败只记录日志并计入熔断器，
/// 熔断打开期间直接跳过，不会拖慢或阻塞主流水线。
pub struct MissionTracker {
    store: Option<Arc<dyn MissionStore>>,
    breaker: CircuitBreaker,
    retention: chrono::Duration,
    /// 串行化读改写操作
    write_lock: Mutex<()>,
}

impl MissionTracker {
    /// 创建追踪器
    ///
    /// # 参数
    ///
    /// * `store` - 状态存储，`None` 时所有操作都是空操作
    /// * `settings` - 任务配置
    pub fn new(store: Option<Arc<dyn MissionStore>>, settings: &MissionSettings) -> Self {
        Self {
            store,
            breaker: CircuitBreaker::new(
                "mission_store",
                CircuitConfig {
                    failure_threshold: settings.failure_threshold,
                    cooldown: Duration::from_secs(settings.cooldown_secs),
                },
            ),
            retention: chrono::Duration::seconds(settings.completed_retention_secs),
            write_lock: Mutex::new(()),
        }
    }

    /// 宣告新任务或更新任务状态
    ///
    /// # 参数
    ///
    /// * `mission_id` - 任务ID
    /// * `description` - 任务描述（通常是巡逻目标）
    /// * `status` - 任务状态
    pub async fn announce(&self, mission_id: &str, description: &str, status: MissionStatus) {
        let mut mission = Mission::new(mission_id, description);
        mission.status = status;
        let _guard = self.write_lock.lock().await;
        if self
            .guarded("announce", |store| async move { store.set(&mission).await })
            .await
            .is_some()
        {
            info!(mission_id, description, "Mission announced");
        }
    }

    /// 标记任务完成并记录产出
    ///
    /// 已累计的发现数不会被更小的 `found_count` 覆盖；
    /// 任务不存在时删除可能残留的字段
    pub async fn complete(&self, mission_id: &str, found_count: u64) {
        let _guard = self.write_lock.lock().await;
        let Some(existing) = self.find(mission_id).await else {
            return;
        };

        match existing {
            Some(mut mission) => {
                mission.status = MissionStatus::Completed;
                mission.discovered_count = mission.discovered_count.max(found_count);
                mission.updated_at = Utc::now();
                let description = mission.description.clone();
                if self
                    .guarded("complete", |store| async move { store.set(&mission).await })
                    .await
                    .is_some()
                {
                    info!(mission_id, target = %description, found = found_count, "Mission completed");
                }
            }
            None => {
                let id = mission_id.to_string();
                self.guarded("complete", |store| async move { store.delete(&id).await })
                    .await;
            }
        }
    }

    /// 累加任务发现的记录数
    pub async fn record_discovered(&self, mission_id: &str, count: u64) {
        if count == 0 {
            return;
        }
        let _guard = self.write_lock.lock().await;
        let Some(Some(mut mission)) = self.find(mission_id).await else {
            debug!(mission_id, "Discovery for unknown mission ignored");
            return;
        };
        mission.discovered_count += count;
        mission.updated_at = Utc::now();
        self.guarded("record_discovered", |store| async move { store.set(&mission).await })
            .await;
    }

    /// 列出活跃任务和最近完成的任务，按开始时间倒序
    ///
    /// 超过保留期的已完成任务会顺带从存储中删除
    pub async fn list_active(&self) -> Vec<Mission> {
        let Some(missions) = self
            .guarded("list_active", |store| async move { store.get_all().await })
            .await
        else {
            return Vec::new();
        };

        let now = Utc::now();
        let (stale, mut live): (Vec<_>, Vec<_>) = missions
            .into_iter()
            .partition(|m| m.is_stale(now, self.retention));

        for mission in stale {
            let id = mission.mission_id;
            self.guarded("purge", |store| async move { store.delete(&id).await })
                .await;
        }

        live.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        live
    }

    /// 熔断器统计信息
    pub fn breaker_stats(&self) -> CircuitStats {
        self.breaker.stats()
    }

    /// 查找任务；外层 `None` 表示存储不可用
    async fn find(&self, mission_id: &str) -> Option<Option<Mission>> {
        self.guarded("find", |store| async move { store.get_all().await })
            .await
            .map(|all| all.into_iter().find(|m| m.mission_id == mission_id))
    }

    /// 经熔断器执行一次存储操作
    ///
    /// 未配置存储或熔断打开时返回 `None`
    async fn guarded<T, F, Fut>(&self, op: &str, call: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn MissionStore>) -> Fut,
        Fut: Future<Output = Result<T, MissionStoreError>>,
    {
        let store = self.store.clone()?;
        if !self.breaker.allow() {
            debug!(op, "Mission store circuit open, skipping");
            return None;
        }
        match call(store).await {
            Ok(value) => {
                self.breaker.record_success();
                Some(value)
            }
            Err(e) => {
                warn!(op, error = %e, "Mission store operation failed");
                self.breaker.record_failure();
                None
            }
        }
    }
}
