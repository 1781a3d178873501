// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 爬取目标
///
/// 由巡逻循环或搜索分发创建，每次爬取尝试消费一次，创建后不再修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTarget {
    /// 目标URL
    pub url: String,
    /// 意图标签，仅用于遥测透传
    #[serde(default = "default_intent")]
    pub intent: String,
    /// 所属任务ID
    #[serde(default)]
    pub mission_id: Option<String>,
}

fn default_intent() -> String {
    "general".to_string()
}

impl CrawlTarget {
    pub fn new(url: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            intent: intent.into(),
            mission_id: None,
        }
    }

    /// 绑定任务ID
    pub fn with_mission(mut self, mission_id: impl Into<String>) -> Self {
        self.mission_id = Some(mission_id.into());
        self
    }
}

/// 爬取结果
///
/// 编排器成功抓取后创建，内容已截断到上限；交给总线后即被丢弃。
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlResult {
    pub url: String,
    pub title: String,
    /// 页面内容（已截断）
    pub content: String,
    pub fetched_at: DateTime<Utc>,
    /// 来源域名
    pub source_domain: String,
    pub intent: String,
    pub mission_id: Option<String>,
}

/// 原始页面事件
///
/// `CrawlResult` 在总线上的传输形式，以 URL 作为消息键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub url: String,
    pub title: String,
    pub html: String,
    pub crawled_at: DateTime<Utc>,
    pub source: String,
    pub intent: String,
    #[serde(default)]
    pub mission_id: Option<String>,
}

impl RawEvent {
    /// 消息键
    pub fn key(&self) -> &str {
        &self.url
    }

    /// 编码为总线负载
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// 从总线负载解码
    pub fn from_bytes(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

impl From<CrawlResult> for RawEvent {
    fn from(result: CrawlResult) -> Self {
        Self {
            url: result.url,
            title: result.title,
            html: result.content,
            crawled_at: result.fetched_at,
            source: result.source_domain,
            intent: result.intent,
            mission_id: result.mission_id,
        }
    }
}

/// 拒绝原因
///
/// 内容质量拒绝不是错误，而是“没有可抽取内容”的终态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// 标题表明页面不存在
    NotFoundTitle(String),
    /// 内容过薄
    ThinContent { len: usize, min: usize },
    /// 域名在黑名单中
    Blacklisted(String),
    /// 截止日期已过
    Expired(String),
    /// 记录未通过边界校验
    Invalid(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotFoundTitle(title) => write!(f, "not found page: {}", title),
            RejectReason::ThinContent { len, min } => {
                write!(f, "thin content: {} < {}", len, min)
            }
            RejectReason::Blacklisted(domain) => write!(f, "blacklisted domain: {}", domain),
            RejectReason::Expired(deadline) => write!(f, "expired: {}", deadline),
            RejectReason::Invalid(reason) => write!(f, "invalid record: {}", reason),
        }
    }
}

/// 单个爬取目标的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// 已发布到总线
    Published,
    /// 总线发布失败，已通过直接调用下游交付
    FallbackDelivered,
    /// 被内容守卫拒绝
    Rejected(RejectReason),
    /// 重试耗尽或下游直接调用也失败
    Failed(String),
}

impl CrawlOutcome {
    /// 指标标签
    pub fn label(&self) -> &'static str {
        match self {
            CrawlOutcome::Published => "published",
            CrawlOutcome::FallbackDelivered => "fallback",
            CrawlOutcome::Rejected(_) => "rejected",
            CrawlOutcome::Failed(_) => "failed",
        }
    }
}

/// 一次 `crawl` 调用的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// 批次数
    pub batches: usize,
    pub published: usize,
    pub fallback: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl CrawlReport {
    pub fn record(&mut self, outcome: &CrawlOutcome) {
        match outcome {
            CrawlOutcome::Published => self.published += 1,
            CrawlOutcome::FallbackDelivered => self.fallback += 1,
            CrawlOutcome::Rejected(_) => self.rejected += 1,
            CrawlOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// 已交付到下游的页面数
    pub fn delivered(&self) -> usize {
        self.published + self.fallback
    }
}
