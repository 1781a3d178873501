// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::CrawlerSettings;
use crate::engines::network_policy::NetworkPolicy;
use crate::engines::stealth::{Fingerprint, STEALTH_INIT_SCRIPT};
use crate::engines::traits::{BrowserSession, EngineError, SessionFactory, WaitStrategy};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const READY_POLL: Duration = Duration::from_millis(100);
const IDLE_POLL: Duration = Duration::from_millis(250);

/// 基于 chromiumoxide 的会话工厂
///
/// 持有一个浏览器进程（本地启动或远程连接），每个会话是一个独立的
/// 浏览器上下文，互不共享 cookie 和缓存
pub struct ChromiumSessionFactory {
    browser: Arc<Browser>,
    policy: NetworkPolicy,
    handler: JoinHandle<()>,
}

impl ChromiumSessionFactory {
    /// 启动或连接浏览器
    ///
    /// # 参数
    ///
    /// * `settings` - 爬虫配置，`remote_debugging_url` 存在时连接远程 Chrome
    ///
    /// # 返回值
    ///
    /// * `Ok(ChromiumSessionFactory)` - 会话工厂
    /// * `Err(EngineError)` - 浏览器不可用
    pub async fn launch(settings: &CrawlerSettings) -> Result<Self, EngineError> {
        let (browser, mut handler) = if let Some(url) = &settings.remote_debugging_url {
            info!(url = %url, "Connecting to remote Chrome instance");
            Browser::connect(url.as_str()).await.map_err(|e| {
                EngineError::Launch(format!("Failed to connect to remote Chrome: {}", e))
            })?
        } else {
            let config = BrowserConfig::builder()
                .no_sandbox()
                .request_timeout(Duration::from_secs(30))
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .arg("--disable-blink-features=AutomationControlled")
                .arg("--disable-infobars")
                .build()
                .map_err(EngineError::Launch)?;
            Browser::launch(config)
                .await
                .map_err(|e| EngineError::Launch(e.to_string()))?
        };

        // 浏览器事件必须持续被消费，否则所有 CDP 调用都会挂起
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            policy: NetworkPolicy::from_settings(settings),
            handler,
        })
    }
}

impl Drop for ChromiumSessionFactory {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    async fn open(&self, fingerprint: &Fingerprint) -> Result<Box<dyn BrowserSession>, EngineError> {
        let context_id = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(EngineError::Session)?;

        let page = match self.browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                dispose_context(&self.browser, context_id).await;
                return Err(e.into());
            }
        };

        let mut session = ChromiumSession {
            browser: self.browser.clone(),
            page,
            context_id,
            interceptor: None,
            closed: false,
        };
        if let Err(e) = session.prepare(fingerprint, &self.policy).await {
            session.shutdown().await;
            return Err(e);
        }
        Ok(Box::new(session))
    }
}

/// 单个隔离的浏览器会话
pub struct ChromiumSession {
    browser: Arc<Browser>,
    page: Page,
    context_id: BrowserContextId,
    interceptor: Option<JoinHandle<()>>,
    closed: bool,
}

impl ChromiumSession {
    /// 应用指纹、请求头、反检测脚本和网络拦截
    async fn prepare(
        &mut self,
        fingerprint: &Fingerprint,
        policy: &NetworkPolicy,
    ) -> Result<(), EngineError> {
        let (width, height) = fingerprint.viewport;

        let user_agent = SetUserAgentOverrideParams::builder()
            .user_agent(fingerprint.user_agent.clone())
            .accept_language(fingerprint.accept_language())
            .build()
            .map_err(EngineError::Session)?;
        self.page.execute(user_agent).await?;
        self.page
            .execute(SetDeviceMetricsOverrideParams::new(
                width as i64,
                height as i64,
                1.0,
                false,
            ))
            .await?;
        self.page
            .execute(SetTimezoneOverrideParams::new(fingerprint.timezone.clone()))
            .await?;
        self.page
            .execute(SetLocaleOverrideParams {
                locale: Some(fingerprint.locale.clone()),
            })
            .await?;
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(
                fingerprint.headers(),
            )))
            .await?;
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(
                STEALTH_INIT_SCRIPT,
            ))
            .await?;

        // 先挂监听再开启拦截，避免漏掉第一批请求
        let mut paused = self.page.event_listener::<EventRequestPaused>().await?;
        let page = self.page.clone();
        let policy = policy.clone();
        self.interceptor = Some(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let resource_type: &str = event.resource_type.as_ref();
                let result = if policy.should_block(&event.request.url, resource_type) {
                    page.execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
                } else {
                    page.execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                };
                if let Err(e) = result {
                    debug!(url = %event.request.url, error = %e, "Request interception failed");
                }
            }
        }));

        let enable = EnableParams::builder()
            .pattern(RequestPattern::builder().url_pattern("*").build())
            .build();
        self.page.execute(enable).await?;
        Ok(())
    }

    async fn evaluate_string(&self, expression: &str) -> Result<String, EngineError> {
        self.page
            .evaluate(expression)
            .await?
            .into_value::<String>()
            .map_err(|e| EngineError::Other(e.to_string()))
    }

    async fn wait_dom_ready(&self) -> Result<(), EngineError> {
        loop {
            let state = self.evaluate_string("document.readyState").await?;
            if state != "loading" {
                return Ok(());
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    /// 资源条目数在连续两次采样中不变即视为网络空闲
    async fn wait_network_quiet(&self) -> Result<(), EngineError> {
        let mut last = -1i64;
        let mut stable = 0;
        while stable < 2 {
            tokio::time::sleep(IDLE_POLL).await;
            let count: i64 = self
                .page
                .evaluate("performance.getEntriesByType('resource').length")
                .await?
                .into_value()
                .map_err(|e| EngineError::Other(e.to_string()))?;
            if count == last {
                stable += 1;
            } else {
                stable = 0;
                last = count;
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(interceptor) = self.interceptor.take() {
            interceptor.abort();
        }
        if let Err(e) = self.page.clone().close().await {
            debug!(error = %e, "Page close failed");
        }
        dispose_context(&self.browser, self.context_id.clone()).await;
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // 任务被取消时没有机会调用 close，这里兜底回收浏览器上下文
        if let Some(interceptor) = self.interceptor.take() {
            interceptor.abort();
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let browser = self.browser.clone();
            let page = self.page.clone();
            let context_id = self.context_id.clone();
            handle.spawn(async move {
                let _ = page.close().await;
                dispose_context(&browser, context_id).await;
            });
        }
    }
}

async fn dispose_context(browser: &Browser, context_id: BrowserContextId) {
    if let Err(e) = browser
        .execute(DisposeBrowserContextParams::new(context_id))
        .await
    {
        warn!(error = %e, "Failed to dispose browser context");
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, wait: WaitStrategy) -> Result<(), EngineError> {
        match wait {
            WaitStrategy::NetworkIdle => {
                self.page
                    .goto(url)
                    .await
                    .map_err(|e| EngineError::Navigation(e.to_string()))?;
                self.wait_network_quiet().await
            }
            WaitStrategy::DomReady | WaitStrategy::Commit => {
                let response = self
                    .page
                    .execute(NavigateParams::new(url))
                    .await
                    .map_err(|e| EngineError::Navigation(e.to_string()))?;
                if let Some(error) = &response.result.error_text {
                    return Err(EngineError::Navigation(error.clone()));
                }
                if wait == WaitStrategy::DomReady {
                    self.wait_dom_ready().await?;
                }
                Ok(())
            }
        }
    }

    async fn move_pointer(&mut self, x: f64, y: f64) -> Result<(), EngineError> {
        self.page
            .execute(DispatchMouseEventParams::new(
                DispatchMouseEventType::MouseMoved,
                x,
                y,
            ))
            .await?;
        Ok(())
    }

    async fn scroll_by(&mut self, pixels: u32) -> Result<(), EngineError> {
        self.page
            .evaluate(format!("window.scrollBy(0, {})", pixels))
            .await?;
        Ok(())
    }

    async fn title(&mut self) -> Result<String, EngineError> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    async fn content(&mut self) -> Result<String, EngineError> {
        Ok(self.page.content().await?)
    }

    async fn close(mut self: Box<Self>) {
        self.shutdown().await;
    }
}
