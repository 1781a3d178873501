// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use bytes::Bytes;
use oppstream::domain::models::record::{ExtractedRecord, Provenance};
use oppstream::domain::services::llm_service::Extractor;
use oppstream::engines::stealth::Fingerprint;
use oppstream::engines::traits::{BrowserSession, EngineError, SessionFactory, WaitStrategy};
use oppstream::queue::event_bus::{BusError, BusEvent, EventBus, EventHandler};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 静态站点：URL 到页面内容的映射，未知 URL 导航失败
#[derive(Default)]
pub struct FakeSite {
    pages: HashMap<String, String>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl FakeSite {
    pub fn with_pages(urls: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            pages: urls
                .iter()
                .map(|url| {
                    let body = format!("<html><body><h1>{}</h1>{}</body></html>", url, "item ".repeat(1200));
                    (url.to_string(), body)
                })
                .collect(),
            ..Self::default()
        })
    }

    pub fn sessions_balanced(&self) -> bool {
        self.opened.load(Ordering::SeqCst) == self.closed.load(Ordering::SeqCst)
    }
}

pub struct SiteFactory(pub Arc<FakeSite>);

#[async_trait]
impl SessionFactory for SiteFactory {
    async fn open(&self, _fingerprint: &Fingerprint) -> Result<Box<dyn BrowserSession>, EngineError> {
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SiteSession {
            site: self.0.clone(),
            current: None,
        }))
    }
}

struct SiteSession {
    site: Arc<FakeSite>,
    current: Option<String>,
}

#[async_trait]
impl BrowserSession for SiteSession {
    async fn navigate(&mut self, url: &str, _wait: WaitStrategy) -> Result<(), EngineError> {
        match self.site.pages.get(url) {
            Some(body) => {
                self.current = Some(body.clone());
                Ok(())
            }
            None => Err(EngineError::Navigation(format!("net::ERR_NAME_NOT_RESOLVED {}", url))),
        }
    }

    async fn move_pointer(&mut self, _x: f64, _y: f64) -> Result<(), EngineError> {
        Ok(())
    }

    async fn scroll_by(&mut self, _pixels: u32) -> Result<(), EngineError> {
        Ok(())
    }

    async fn title(&mut self) -> Result<String, EngineError> {
        Ok("Opportunities".to_string())
    }

    async fn content(&mut self) -> Result<String, EngineError> {
        Ok(self.current.clone().unwrap_or_default())
    }

    async fn close(self: Box<Self>) {
        self.site.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// 按页面 URL 返回预设记录的抽取服务
#[derive(Default)]
pub struct ScriptedExtractor {
    by_url: HashMap<String, Vec<ExtractedRecord>>,
    pub calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(entries: Vec<(&str, Vec<ExtractedRecord>)>) -> Self {
        Self {
            by_url: entries
                .into_iter()
                .map(|(url, records)| (url.to_string(), records))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, _html: &str, page_url: &str) -> anyhow::Result<Vec<ExtractedRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.by_url.get(page_url).cloned().unwrap_or_default())
    }
}

pub fn opportunity(title: &str, organization: &str, source_url: &str) -> ExtractedRecord {
    ExtractedRecord {
        title: title.to_string(),
        organization: organization.to_string(),
        amount: Some(10_000.0),
        amount_display: Some("$10,000".to_string()),
        deadline: Some("2099-06-30".to_string()),
        geo_tags: vec![],
        type_tags: vec![],
        description: format!("{} by {}", title, organization),
        source_url: source_url.to_string(),
        provenance: Provenance::Refinery,
        is_update: false,
        mission_id: None,
    }
}

/// 收集某个主题上的全部事件
#[derive(Default)]
pub struct Collector {
    pub events: Mutex<Vec<BusEvent>>,
}

impl Collector {
    pub fn records(&self) -> Vec<ExtractedRecord> {
        self.events
            .lock()
            .iter()
            .map(|e| serde_json::from_slice(&e.payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl EventHandler for Collector {
    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "collector"
    }
}

/// 永远不可达的代理
pub struct DownBus;

#[async_trait]
impl EventBus for DownBus {
    async fn publish(&self, _topic: &str, _key: &str, _payload: Bytes) -> bool {
        false
    }

    async fn subscribe(&self, _topic: &str, _handler: Arc<dyn EventHandler>) {}

    async fn start(&self) -> Result<(), BusError> {
        Err(BusError::Unavailable("connection refused".to_string()))
    }

    async fn stop(&self) {}

    fn mode(&self) -> &'static str {
        "down"
    }
}

/// 轮询直到条件成立或超时
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
