// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::PatrolSettings;
use crate::domain::models::crawl::{CrawlReport, CrawlTarget};
use crate::domain::models::mission::MissionStatus;
use crate::domain::services::crawl_service::CrawlOrchestrator;
use crate::domain::services::mission_service::MissionTracker;
use crate::utils::errors::WorkerError;
use crate::workers::worker::Worker;
use async_trait::async_trait;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// 巡逻工作器
///
/// 按固定周期把配置的目标交给编排器，每一轮作为一个任务上报进度
pub struct PatrolWorker {
    orchestrator: Arc<CrawlOrchestrator>,
    tracker: Arc<MissionTracker>,
    targets: Vec<String>,
    interval: Duration,
}

impl PatrolWorker {
    pub fn new(
        orchestrator: Arc<CrawlOrchestrator>,
        tracker: Arc<MissionTracker>,
        settings: &PatrolSettings,
    ) -> Self {
        Self {
            orchestrator,
            tracker,
            targets: settings.targets.clone(),
            interval: Duration::from_secs(settings.interval_secs.max(1)),
        }
    }

    /// 执行一轮巡逻
    ///
    /// # 返回值
    ///
    /// 本轮任务ID和爬取汇总
    pub async fn run_cycle(&self) -> (String, CrawlReport) {
        let mission_id = mint_mission_id();
        let description = self.targets.join(", ");
        self.tracker
            .announce(&mission_id, &description, MissionStatus::Active)
            .await;

        let targets = self
            .targets
            .iter()
            .map(|url| CrawlTarget::new(url.as_str(), "patrol").with_mission(mission_id.as_str()))
            .collect();
        let report = self.orchestrator.crawl(targets).await;

        self.tracker
            .complete(&mission_id, report.delivered() as u64)
            .await;
        info!(
            mission_id = %mission_id,
            delivered = report.delivered(),
            rejected = report.rejected,
            failed = report.failed,
            "Patrol cycle finished"
        );
        (mission_id, report)
    }
}

/// 生成 `patrol_` 加 6 位小写字母数字的任务ID
fn mint_mission_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("patrol_{}", suffix.to_lowercase())
}

#[async_trait]
impl Worker for PatrolWorker {
    async fn run(&self) -> Result<(), WorkerError> {
        if self.targets.is_empty() {
            warn!("Patrol enabled without targets, worker exiting");
            return Ok(());
        }
        info!(
            targets = self.targets.len(),
            interval_secs = self.interval.as_secs(),
            "Patrol worker started"
        );

        let mut interval = tokio::time::interval(self.interval);
        // 一轮巡逻可能超过周期，错过的轮次不补跑
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.run_cycle().await;
        }
    }

    fn name(&self) -> &str {
        "patrol"
    }
}

#[cfg(test)]
#[path = "patrol_worker_test.rs"]
mod tests;
