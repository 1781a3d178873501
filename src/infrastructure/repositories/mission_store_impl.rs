// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::mission::Mission;
use crate::domain::repositories::mission_store::{MissionStore, MissionStoreError};
use crate::infrastructure::cache::redis_client::RedisClient;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// 基于 Redis 哈希的任务状态存储
///
/// 所有任务写在同一个哈希键下，每次写入刷新整个键的 TTL
pub struct RedisMissionStore {
    client: RedisClient,
    key: String,
    ttl_secs: u64,
}

impl RedisMissionStore {
    /// 创建 Redis 任务存储
    ///
    /// # 参数
    ///
    /// * `client` - Redis客户端
    /// * `key` - 哈希键
    /// * `ttl_secs` - 键的过期时间（秒）
    pub fn new(client: RedisClient, key: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            client,
            key: key.into(),
            ttl_secs,
        }
    }
}

fn unavailable(err: anyhow::Error) -> MissionStoreError {
    MissionStoreError::Unavailable(err.to_string())
}

#[async_trait]
impl MissionStore for RedisMissionStore {
    async fn set(&self, mission: &Mission) -> Result<(), MissionStoreError> {
        let payload = serde_json::to_string(mission)?;
        self.client
            .hset_with_ttl(&self.key, &mission.mission_id, &payload, self.ttl_secs)
            .await
            .map_err(unavailable)
    }

    async fn get_all(&self) -> Result<Vec<Mission>, MissionStoreError> {
        let raw = self.client.hgetall(&self.key).await.map_err(unavailable)?;
        let missions = raw
            .into_iter()
            .filter_map(|(id, payload)| match serde_json::from_str::<Mission>(&payload) {
                Ok(mission) => Some(mission),
                Err(e) => {
                    warn!(mission_id = %id, error = %e, "Skipping malformed mission entry");
                    None
                }
            })
            .collect();
        Ok(missions)
    }

    async fn delete(&self, mission_id: &str) -> Result<(), MissionStoreError> {
        self.client
            .hdel(&self.key, mission_id)
            .await
            .map_err(unavailable)
    }
}

/// 进程内任务状态存储
///
/// 未配置 Redis 时使用，模拟单键 TTL：距最后一次写入超过 TTL 后整体清空
pub struct InMemoryMissionStore {
    missions: DashMap<String, Mission>,
    last_write: Mutex<Option<Instant>>,
    ttl: Duration,
}

impl InMemoryMissionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            missions: DashMap::new(),
            last_write: Mutex::new(None),
            ttl,
        }
    }

    fn expire_if_due(&self) {
        let mut last_write = self.last_write.lock();
        if last_write.is_some_and(|at| at.elapsed() > self.ttl) {
            self.missions.clear();
            *last_write = None;
        }
    }
}

#[async_trait]
impl MissionStore for InMemoryMissionStore {
    async fn set(&self, mission: &Mission) -> Result<(), MissionStoreError> {
        self.expire_if_due();
        self.missions
            .insert(mission.mission_id.clone(), mission.clone());
        *self.last_write.lock() = Some(Instant::now());
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Mission>, MissionStoreError> {
        self.expire_if_due();
        Ok(self.missions.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn delete(&self, mission_id: &str) -> Result<(), MissionStoreError> {
        self.missions.remove(mission_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_store_expires_whole_key() {
        let store = InMemoryMissionStore::new(Duration::from_secs(3600));
        store.set(&Mission::new("patrol_a1b2c3", "devpost.com")).await.unwrap();
        tokio::time::advance(Duration::from_secs(1800)).await;
        store.set(&Mission::new("patrol_d4e5f6", "taikai.network")).await.unwrap();

        // 第二次写入刷新了整个键的 TTL
        tokio::time::advance(Duration::from_secs(3000)).await;
        assert_eq!(store.get_all().await.unwrap().len(), 2);

        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_store_delete() {
        let store = InMemoryMissionStore::new(Duration::from_secs(60));
        store.set(&Mission::new("m1", "target")).await.unwrap();
        store.delete("m1").await.unwrap();
        store.delete("missing").await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_redis_store_round_trip() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let client = RedisClient::new(&url).await.unwrap();
        let store = RedisMissionStore::new(client, "oppstream:test:pulse", 60);

        let mission = Mission::new("patrol_test01", "devpost.com");
        store.set(&mission).await.unwrap();
        let all = store.get_all().await.unwrap();
        assert!(all.iter().any(|m| m.mission_id == "patrol_test01"));
        store.delete("patrol_test01").await.unwrap();
    }
}
