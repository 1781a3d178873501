// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::ExtractionSettings;
use crate::domain::models::record::{ExtractedRecord, Provenance};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

/// 外部抽取服务
///
/// 把页面 HTML 变成结构化记录。出错时错误文本需携带状态码，
/// 供限流器识别 429/403 等情况。
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, html: &str, page_url: &str) -> Result<Vec<ExtractedRecord>>;
}

/// 模型返回的单条记录，字段全部宽松解析
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelRecord {
    title: Option<String>,
    organization: Option<String>,
    amount: Option<Value>,
    amount_display: Option<String>,
    deadline: Option<String>,
    geo_tags: Option<Vec<String>>,
    type_tags: Option<Vec<String>>,
    description: Option<String>,
    source_url: Option<String>,
}

impl ModelRecord {
    fn into_record(self, page_url: &Url) -> ExtractedRecord {
        // 相对链接按页面地址解析，缺失时退回页面地址
        let source_url = self
            .source_url
            .filter(|u| !u.trim().is_empty())
            .and_then(|u| page_url.join(u.trim()).ok())
            .unwrap_or_else(|| page_url.clone())
            .to_string();

        ExtractedRecord {
            title: self.title.unwrap_or_default().trim().to_string(),
            organization: self.organization.unwrap_or_default().trim().to_string(),
            // 模型用 0 表示未知，非数字的金额只保留展示文本
            amount: self.amount.and_then(|a| a.as_f64()).filter(|a| *a > 0.0),
            amount_display: self.amount_display.filter(|s| !s.trim().is_empty()),
            deadline: self.deadline.filter(|s| !s.trim().is_empty()),
            geo_tags: self.geo_tags.unwrap_or_default(),
            type_tags: self.type_tags.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            source_url,
            provenance: Provenance::Refinery,
            is_update: false,
            mission_id: None,
        }
    }
}

/// LLM抽取客户端 - OpenAI 兼容的 chat completions 接口
///
/// # 配置
///
/// 通过 `extraction` 配置段设置接口地址、密钥和模型
pub struct LlmExtractor {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    api_base_url: String,
    max_input_chars: usize,
}

impl LlmExtractor {
    pub fn new(settings: &ExtractionSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build LLM HTTP client")?;
        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            api_base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            max_input_chars: settings.max_input_chars,
        })
    }

    /// 从模型输出中解析记录数组
    ///
    /// 接受裸数组，或 `{"opportunities": [...]}` 形式的包装对象
    fn parse_records(content: &str, page_url: &Url) -> Result<Vec<ExtractedRecord>> {
        let clean_content = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        let data: Value = serde_json::from_str(clean_content)
            .context("Failed to parse extracted JSON content")?;
        let items = match data {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("opportunities") {
                Some(Value::Array(items)) => items,
                _ => vec![Value::Object(map)],
            },
            _ => return Err(anyhow::anyhow!("Unexpected extraction payload shape")),
        };

        Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<ModelRecord>(item).ok())
            .map(|r| r.into_record(page_url))
            .collect())
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, html: &str, page_url: &str) -> Result<Vec<ExtractedRecord>> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("LLM API key not configured"))?;
        let page = Url::parse(page_url).context("Invalid page URL")?;

        let truncated_text: String = html.chars().take(self.max_input_chars).collect();
        let prompt = format!(
            "Extract every distinct opportunity (hackathon, grant, bounty, scholarship, competition) \
            from the page below. Return ONLY a JSON array; each item has the keys title, organization, \
            amount (number in USD or null), amount_display, deadline (YYYY-MM-DD or null), geo_tags, \
            type_tags, description, source_url. Page URL: {}. Page: {}",
            page_url, truncated_text
        );

        let request_body = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a data extraction assistant. You output only valid JSON."
                },
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "temperature": 0.0
        });

        let url = format!("{}/chat/completions", self.api_base_url);
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request_body)
            .send()
            .await
            .context("Failed to send request to LLM API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "LLM API returned error: {} - {}",
                status,
                error_text
            ));
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse LLM API response")?;

        match body["choices"][0]["message"]["content"].as_str() {
            Some(content) => Self::parse_records(content, &page),
            None => Err(anyhow::anyhow!("Invalid response format from LLM API")),
        }
    }
}
