// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::mission::Mission;
use async_trait::async_trait;
use thiserror::Error;

/// 任务状态存储错误
#[derive(Error, Debug)]
pub enum MissionStoreError {
    #[error("Mission store unavailable: {0}")]
    Unavailable(String),
    #[error("Mission payload invalid: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 任务状态存储特质
///
/// 带 TTL 的键值存储，只需要 set / get-all / delete-one
#[async_trait]
pub trait MissionStore: Send + Sync {
    async fn set(&self, mission: &Mission) -> Result<(), MissionStoreError>;
    async fn get_all(&self) -> Result<Vec<Mission>, MissionStoreError>;
    async fn delete(&self, mission_id: &str) -> Result<(), MissionStoreError>;
}
