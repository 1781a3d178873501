// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;
use validator::Validate;

/// 记录来源的保真度
///
/// 深度重抓的记录比普通抓取更可信，按声明顺序递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    #[default]
    Standard,
    Enriched,
    Refinery,
    Deep,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Standard => "standard",
            Provenance::Enriched => "enriched",
            Provenance::Refinery => "refinery",
            Provenance::Deep => "deep",
        }
    }
}

/// 抽取后的机会记录
///
/// 由外部抽取服务从 `RawEvent` 生成，尚未做唯一性判断
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ExtractedRecord {
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub amount_display: Option<String>,
    /// 截止日期（RFC 3339 或 `YYYY-MM-DD`）
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub geo_tags: Vec<String>,
    #[serde(default)]
    pub type_tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[validate(url(message = "source_url must be an absolute URL"))]
    pub source_url: String,
    #[serde(default)]
    pub provenance: Provenance,
    /// 由去重引擎标记
    #[serde(default)]
    pub is_update: bool,
    #[serde(default)]
    pub mission_id: Option<String>,
}

impl ExtractedRecord {
    /// 计算去重标识
    pub fn identifier(&self) -> Identifier {
        Identifier::compute(&self.source_url, &self.title, &self.organization)
    }

    /// 计算跨URL的内容指纹
    pub fn fingerprint(&self) -> String {
        let amount = self.amount.map(|a| a.to_string()).unwrap_or_default();
        let canonical = format!(
            "{}|{}|{}|{}",
            normalize_text(&self.title),
            normalize_text(&self.organization),
            amount,
            self.deadline.as_deref().map(str::trim).unwrap_or_default()
        );
        short_digest(&canonical)
    }

    /// 解析截止日期
    pub fn deadline_date(&self) -> Option<NaiveDate> {
        let raw = self.deadline.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.date_naive())
            .ok()
            .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
    }

    /// 截止日期是否早于 `today`；无法解析的日期视为未过期
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.deadline_date().is_some_and(|d| d < today)
    }
}

/// 去重标识
///
/// 规范化后的 `(source_url | title | organization)` 的稳定哈希
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn compute(source_url: &str, title: &str, organization: &str) -> Self {
        let canonical = format!(
            "{}|{}|{}",
            normalize_url(source_url),
            normalize_text(title),
            normalize_text(organization)
        );
        Identifier(format!("opp_{}", short_digest(&canonical)))
    }

    /// 包装已持久化的标识
    pub fn from_stored(value: impl Into<String>) -> Self {
        Identifier(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn short_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// 文本规范化：去首尾空白、合并连续空白、转小写
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// URL 规范化：去掉片段，小写，去掉末尾斜杠
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let normalized = match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    };
    normalized.to_lowercase().trim_end_matches('/').to_string()
}
