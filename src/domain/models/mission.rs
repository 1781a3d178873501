// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    #[default]
    Active,
    Completed,
}

/// 发现任务
///
/// 一组共享进度追踪的爬取或搜索目标，保存在带 TTL 的共享状态存储中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: String,
    pub description: String,
    pub status: MissionStatus,
    /// 已发现的记录数
    #[serde(default)]
    pub discovered_count: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    pub fn new(mission_id: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            mission_id: mission_id.into(),
            description: description.into(),
            status: MissionStatus::Active,
            discovered_count: 0,
            started_at: now,
            updated_at: now,
        }
    }

    /// 已完成且超过保留时间
    pub fn is_stale(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.status == MissionStatus::Completed && now - self.updated_at > retention
    }
}
