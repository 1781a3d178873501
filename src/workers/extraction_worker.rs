// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::ExtractionSettings;
use crate::domain::models::crawl::RawEvent;
use crate::domain::models::record::ExtractedRecord;
use crate::domain::services::llm_service::Extractor;
use crate::domain::services::mission_service::MissionTracker;
use crate::domain::services::rate_limiting_service::AdaptiveRateLimiter;
use crate::queue::event_bus::{BusEvent, EventHandler};
use crate::queue::fallback::{Delivery, FallbackPublisher};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

const GLOBAL_MARKERS: [&str; 5] = ["remote", "online", "global", "international", "worldwide"];
const TYPE_MARKERS: [(&str, &str); 4] = [
    ("hackathon", "Hackathon"),
    ("grant", "Grant"),
    ("scholarship", "Scholarship"),
    ("bounty", "Bounty"),
];

/// 抽取阶段
///
/// 订阅原始页面主题。每个页面经限流器调用一次外部抽取服务，得到的记录
/// 过滤过期项、补全标签、校验后发布到抽取主题；发布失败时直接交给去重阶段。
pub struct ExtractionStage {
    extractor: Arc<dyn Extractor>,
    limiter: Arc<AdaptiveRateLimiter>,
    publisher: FallbackPublisher,
    next_stage: Arc<dyn EventHandler>,
    tracker: Arc<MissionTracker>,
    extracted_topic: String,
    drop_expired: bool,
}

impl ExtractionStage {
    /// 创建抽取阶段
    ///
    /// # 参数
    ///
    /// * `extractor` - 外部抽取服务
    /// * `limiter` - 包裹外部调用的自适应限流器
    /// * `publisher` - 带直连兜底的发布器
    /// * `next_stage` - 去重阶段，发布失败时直接调用
    /// * `tracker` - 任务追踪器，用于累加发现数
    /// * `extracted_topic` - 抽取记录主题
    /// * `settings` - 抽取配置
    pub fn new(
        extractor: Arc<dyn Extractor>,
        limiter: Arc<AdaptiveRateLimiter>,
        publisher: FallbackPublisher,
        next_stage: Arc<dyn EventHandler>,
        tracker: Arc<MissionTracker>,
        extracted_topic: impl Into<String>,
        settings: &ExtractionSettings,
    ) -> Self {
        Self {
            extractor,
            limiter,
            publisher,
            next_stage,
            tracker,
            extracted_topic: extracted_topic.into(),
            drop_expired: settings.drop_expired,
        }
    }

    /// 把一条记录交给下游，返回是否交付成功
    async fn forward(&self, record: &ExtractedRecord) -> bool {
        let key = record.identifier().to_string();
        let payload = match serde_json::to_vec(record) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!(key = %key, error = %e, "Failed to encode extracted record");
                return false;
            }
        };

        match self
            .publisher
            .deliver(&self.extracted_topic, &key, payload, self.next_stage.as_ref())
            .await
        {
            Ok(Delivery::Published) => true,
            Ok(Delivery::Direct) => {
                debug!(key = %key, "Record handed directly to dedup stage");
                true
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to deliver extracted record");
                false
            }
        }
    }
}

/// 根据标题、描述和已有标签补全地域标签和类型标签
///
/// 没有任何地域信息时默认 `Global`
pub fn enrich_tags(record: &mut ExtractedRecord) {
    let haystack = format!(
        "{} {} {} {}",
        record.title,
        record.description,
        record.geo_tags.join(" "),
        record.type_tags.join(" ")
    )
    .to_lowercase();

    let is_global = GLOBAL_MARKERS.iter().any(|m| haystack.contains(m));
    if (is_global || record.geo_tags.is_empty()) && !has_tag(&record.geo_tags, "Global") {
        record.geo_tags.push("Global".to_string());
    }

    for (marker, tag) in TYPE_MARKERS {
        if haystack.contains(marker) && !has_tag(&record.type_tags, tag) {
            record.type_tags.push(tag.to_string());
        }
    }
}

fn has_tag(tags: &[String], tag: &str) -> bool {
    tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

#[async_trait]
impl EventHandler for ExtractionStage {
    #[instrument(skip(self, event), fields(topic = %event.topic, key = %event.key))]
    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
        // 无法解码的负载重投也不会成功，记录后丢弃
        let raw = match RawEvent::from_bytes(&event.payload) {
            Ok(raw) => raw,
            Err(e) => {
                error!(key = %event.key, error = %e, "Dropping malformed raw event");
                return Ok(());
            }
        };
        if raw.html.trim().is_empty() {
            warn!(url = %raw.url, "Raw event has no content, skipping extraction");
            return Ok(());
        }

        let records = self
            .limiter
            .execute(|| self.extractor.extract(&raw.html, &raw.url))
            .await?;

        if records.is_empty() {
            info!(url = %raw.url, "No opportunities extracted");
            return Ok(());
        }

        let today = Utc::now().date_naive();
        let total = records.len();
        let mut forwarded = 0u64;

        for mut record in records {
            record.mission_id = raw.mission_id.clone();

            if self.drop_expired && record.is_expired(today) {
                debug!(
                    title = %record.title,
                    deadline = record.deadline.as_deref().unwrap_or_default(),
                    "Dropping expired record"
                );
                continue;
            }

            enrich_tags(&mut record);

            if let Err(e) = record.validate() {
                warn!(title = %record.title, error = %e, "Dropping invalid extracted record");
                continue;
            }

            if self.forward(&record).await {
                forwarded += 1;
            }
        }

        if let Some(mission_id) = raw.mission_id.as_deref() {
            self.tracker.record_discovered(mission_id, forwarded).await;
        }

        info!(
            url = %raw.url,
            extracted = total,
            forwarded,
            intent = %raw.intent,
            "Extraction completed"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "extraction"
    }
}

#[cfg(test)]
#[path = "extraction_worker_test.rs"]
mod tests;
