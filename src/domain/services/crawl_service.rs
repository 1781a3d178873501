// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::settings::CrawlerSettings;
use crate::domain::models::crawl::{CrawlOutcome, CrawlReport, CrawlResult, CrawlTarget, RawEvent};
use crate::engines::content_guard::ContentGuard;
use crate::engines::stealth::Fingerprint;
use crate::engines::traits::{BrowserSession, EngineError, SessionFactory, WaitStrategy};
use crate::queue::event_bus::EventHandler;
use crate::queue::fallback::{Delivery, FallbackPublisher};
use crate::utils::retry_policy::RetryPolicy;
use chrono::Utc;
use futures::future::join_all;
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// 一次页面访问读到的内容
struct PageCapture {
    title: String,
    content: String,
}

/// 爬取编排器
///
/// 以固定大小的批次并发抓取目标，批次之间插入随机间隔。每个目标使用独立指纹的
/// 隔离会话，导航按三级等待策略逐级退化，抓取结果经内容守卫检查后发布到原始页面主题；
/// 发布失败时同步调用下一阶段，保证已抓取的内容不会丢失。
pub struct CrawlOrchestrator {
    factory: Arc<dyn SessionFactory>,
    publisher: FallbackPublisher,
    next_stage: Arc<dyn EventHandler>,
    guard: ContentGuard,
    retry: RetryPolicy,
    raw_topic: String,
    settings: CrawlerSettings,
}

impl CrawlOrchestrator {
    /// 创建编排器
    ///
    /// # 参数
    ///
    /// * `settings` - 爬虫配置
    /// * `raw_topic` - 原始页面主题
    /// * `factory` - 浏览器会话工厂
    /// * `publisher` - 带兜底的发布器
    /// * `next_stage` - 发布失败时直接调用的下游阶段
    pub fn new(
        settings: CrawlerSettings,
        raw_topic: impl Into<String>,
        factory: Arc<dyn SessionFactory>,
        publisher: FallbackPublisher,
        next_stage: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            factory,
            publisher,
            next_stage,
            guard: ContentGuard::from_settings(&settings),
            retry: RetryPolicy::navigation(settings.max_attempts),
            raw_topic: raw_topic.into(),
            settings,
        }
    }

    /// 分批爬取目标
    ///
    /// 每批内的目标并发执行，整批结束后等待随机间隔再开始下一批。
    /// 单个目标的失败只体现在汇总里，不会中断其他目标。
    ///
    /// # 参数
    ///
    /// * `targets` - 爬取目标
    ///
    /// # 返回值
    ///
    /// 各结果类别的计数
    pub async fn crawl(&self, targets: Vec<CrawlTarget>) -> CrawlReport {
        let mut report = CrawlReport::default();
        if targets.is_empty() {
            return report;
        }

        let batch_size = self.settings.batch_size.max(1);
        info!(
            target_count = targets.len(),
            batch_size, "Deploying crawl squad"
        );

        for (index, batch) in targets.chunks(batch_size).enumerate() {
            if index > 0 {
                let stagger = self.stagger();
                debug!(batch = index, stagger_ms = stagger.as_millis() as u64, "Staggering next batch");
                sleep(stagger).await;
            }

            report.batches += 1;
            let outcomes = join_all(batch.iter().map(|target| self.crawl_target(target))).await;
            for outcome in &outcomes {
                counter!("crawl_targets_total", "outcome" => outcome.label()).increment(1);
                report.record(outcome);
            }
        }

        info!(
            batches = report.batches,
            published = report.published,
            fallback = report.fallback,
            rejected = report.rejected,
            failed = report.failed,
            "Crawl squad finished"
        );
        report
    }

    /// 单次抓取一个地址并返回页面 HTML
    ///
    /// 不做交互、不发布。第 k 次尝试从第 min(k, 2) 级等待策略开始，
    /// 越往后越只等待更廉价的加载信号。
    ///
    /// # 参数
    ///
    /// * `url` - 目标地址
    ///
    /// # 返回值
    ///
    /// * `Ok(String)` - 页面 HTML
    /// * `Err(EngineError)` - 所有尝试均失败时的最后一个错误
    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<String, EngineError> {
        let attempts = self.settings.max_attempts.max(1);
        let mut last_error = EngineError::Other("no attempt made".to_string());

        for attempt in 0..attempts {
            let first_tier = (attempt as usize).min(WaitStrategy::TIERS.len() - 1);
            info!(attempt = attempt + 1, first_tier = %WaitStrategy::TIERS[first_tier], "Direct fetch approaching");

            match self.visit(url, first_tier, false).await {
                Ok(page) if page.content.len() >= self.settings.fetch_min_content_len => {
                    return Ok(page.content);
                }
                Ok(page) => {
                    warn!(length = page.content.len(), "Content too thin, retrying");
                    last_error = EngineError::ThinContent {
                        len: page.content.len(),
                        min: self.settings.fetch_min_content_len,
                    };
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt = attempt + 1, error = %e, "Direct fetch attempt failed");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }

            if attempt + 1 < attempts {
                sleep(self.retry.calculate_backoff(attempt)).await;
            }
        }

        Err(last_error)
    }

    /// 爬取单个目标，返回最终结果
    #[instrument(skip(self, target), fields(url = %target.url, intent = %target.intent))]
    async fn crawl_target(&self, target: &CrawlTarget) -> CrawlOutcome {
        if let Err(reason) = self.guard.check_target(&target.url) {
            info!(reason = %reason, "Ignoring blacklisted target");
            return CrawlOutcome::Rejected(reason);
        }

        let attempts = self.settings.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match self.visit(&target.url, 0, true).await {
                Ok(page) => {
                    if let Err(reason) = self.guard.inspect(&target.url, &page.title, &page.content)
                    {
                        warn!(title = %page.title, reason = %reason, "Crawl aborted by content guard");
                        return CrawlOutcome::Rejected(reason);
                    }
                    return self.publish(target, page).await;
                }
                Err(e) => {
                    last_error = e.to_string();
                    if !e.is_retryable() || attempt + 1 >= attempts {
                        break;
                    }
                    let delay = self.retry.calculate_backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Crawl attempt failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }

        error!(error = %last_error, "Crawl failed after retries");
        CrawlOutcome::Failed(last_error)
    }

    /// 打开一个会话访问页面，无论结果如何都关闭会话
    async fn visit(
        &self,
        url: &str,
        first_tier: usize,
        interact: bool,
    ) -> Result<PageCapture, EngineError> {
        let fingerprint = Fingerprint::random();
        let mut session = self.factory.open(&fingerprint).await?;
        let result = self.drive(session.as_mut(), url, first_tier, interact).await;
        session.close().await;
        result
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
        first_tier: usize,
        interact: bool,
    ) -> Result<PageCapture, EngineError> {
        let tier = self.navigate(session, url, first_tier).await?;
        debug!(tier = %tier, "Navigation committed");

        if interact {
            self.interact(session).await;
        }
        sleep(Duration::from_millis(self.settings.settle_ms)).await;

        let title = self.bounded(session.title()).await?;
        let content = self.bounded(session.content()).await?;
        Ok(PageCapture { title, content })
    }

    /// 依次尝试各级等待策略，每级有自己的超时
    async fn navigate(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
        first_tier: usize,
    ) -> Result<WaitStrategy, EngineError> {
        let timeouts = self.settings.tier_timeouts();
        let mut last_error = EngineError::Navigation("no wait strategy attempted".to_string());

        for (index, tier) in WaitStrategy::TIERS.iter().enumerate().skip(first_tier) {
            match timeout(timeouts[index], session.navigate(url, *tier)).await {
                Ok(Ok(())) => return Ok(*tier),
                Ok(Err(e)) => {
                    debug!(tier = %tier, error = %e, "Wait strategy failed, degrading");
                    last_error = e;
                }
                Err(_) => {
                    debug!(tier = %tier, timeout_secs = timeouts[index].as_secs(), "Wait strategy timed out, degrading");
                    last_error = EngineError::Timeout(timeouts[index]);
                }
            }
        }
        Err(last_error)
    }

    /// 轻量的拟人交互，触发懒加载内容
    ///
    /// 交互失败不影响抓取，只记录日志
    async fn interact(&self, session: &mut dyn BrowserSession) {
        let x = rand::random_range(100.0..500.0);
        let y = rand::random_range(100.0..500.0);
        if let Err(e) = self.bounded(session.move_pointer(x, y)).await {
            debug!(error = %e, "Pointer move failed");
        }
        sleep(Duration::from_millis(rand::random_range(500..1500))).await;

        for _ in 0..self.settings.scroll_steps {
            if let Err(e) = self.bounded(session.scroll_by(self.settings.scroll_px)).await {
                debug!(error = %e, "Scroll failed");
                break;
            }
            sleep(Duration::from_millis(self.settings.scroll_pause_ms)).await;
        }
    }

    /// 用最廉价一级的超时约束单个浏览器调用
    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        let limit = Duration::from_secs(self.settings.commit_timeout_secs);
        timeout(limit, op)
            .await
            .map_err(|_| EngineError::Timeout(limit))?
    }

    async fn publish(&self, target: &CrawlTarget, page: PageCapture) -> CrawlOutcome {
        let size = page.content.len();
        let result = CrawlResult {
            url: target.url.clone(),
            title: page.title,
            content: self.guard.cap(page.content),
            fetched_at: Utc::now(),
            source_domain: source_domain(&target.url),
            intent: target.intent.clone(),
            mission_id: target.mission_id.clone(),
        };
        let event = RawEvent::from(result);
        let payload = match event.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode raw event");
                return CrawlOutcome::Failed(e.to_string());
            }
        };

        match self
            .publisher
            .deliver(&self.raw_topic, event.key(), payload, self.next_stage.as_ref())
            .await
        {
            Ok(Delivery::Published) => {
                info!(size, "Page transmitted");
                CrawlOutcome::Published
            }
            Ok(Delivery::Direct) => {
                warn!(size, "Page delivered through fallback");
                CrawlOutcome::FallbackDelivered
            }
            Err(e) => {
                error!(error = %e, "Page lost: publish and direct delivery both failed");
                CrawlOutcome::Failed(e.to_string())
            }
        }
    }

    fn stagger(&self) -> Duration {
        let min = self.settings.stagger_min_ms;
        let max = self.settings.stagger_max_ms.max(min);
        Duration::from_millis(rand::random_range(min..=max))
    }
}

/// 提取 URL 的主机名，无法解析时返回空串
fn source_domain(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}
