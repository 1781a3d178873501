// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::RateLimiterSettings;
use crate::utils::retry_policy::RetryPolicy;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// 令牌窗口长度
const TOKEN_WINDOW: Duration = Duration::from_secs(60);

/// 限流执行错误
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// 限流重试耗尽
    #[error("External service throttled after {attempts} attempts: {message}")]
    Throttled { attempts: u32, message: String },
    /// 认证或权限错误，不重试
    #[error("External service rejected credentials: {0}")]
    Unauthorized(String),
    /// 其他错误，已重试一次
    #[error("External service call failed: {0}")]
    Failed(String),
}

/// 外部服务错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Throttled,
    Auth,
    Other,
}

const THROTTLE_CODES: [&str; 1] = ["429"];
const THROTTLE_PHRASES: [&str; 3] = ["resource exhausted", "rate limit", "too many requests"];
const AUTH_CODES: [&str; 2] = ["401", "403"];
const AUTH_PHRASES: [&str; 3] = ["unauthorized", "forbidden", "permission denied"];

/// 根据错误文本识别限流和认证错误
///
/// 外部服务被当作不透明的异步函数，只能从错误描述中识别状态码。
/// 状态码必须是独立的词，URL 和更长的数字里出现的同样字符不算。
pub fn classify_error(err: &anyhow::Error) -> ErrorClass {
    let text = format!("{:#}", err).to_lowercase();
    let codes = status_tokens(&text);
    let hit = |tokens: &[&str], phrases: &[&str]| {
        tokens.iter().any(|code| codes.contains(code))
            || phrases.iter().any(|phrase| text.contains(phrase))
    };

    if hit(&THROTTLE_CODES[..], &THROTTLE_PHRASES[..]) {
        ErrorClass::Throttled
    } else if hit(&AUTH_CODES[..], &AUTH_PHRASES[..]) {
        ErrorClass::Auth
    } else {
        ErrorClass::Other
    }
}

/// 错误文本里可能是状态码的独立数字，跳过含 `/` 的词（URL 和路径）
fn status_tokens(text: &str) -> Vec<&str> {
    text.split_whitespace()
        .filter(|word| !word.contains('/'))
        .flat_map(|word| word.split(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|token| token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit()))
        .collect()
}

/// 令牌桶内部状态
#[derive(Debug)]
struct RateBucket {
    /// 最近 60 秒内的调用时间
    calls: VecDeque<Instant>,
    effective_rpm: u32,
    consecutive_throttles: u32,
}

impl RateBucket {
    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.calls.front() {
            if now.duration_since(*front) >= TOKEN_WINDOW {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }
}

/// 自适应限流器
///
/// 包裹所有对外部抽取服务的异步调用。包含两个相互独立的限制：
/// 60 秒滑动窗口内的调用次数上限（`effective_rpm`），以及同时在途调用数的信号量。
/// 应在进程启动时创建一次，并以 `Arc` 共享给所有调用方。
pub struct AdaptiveRateLimiter {
    bucket: Mutex<RateBucket>,
    semaphore: Semaphore,
    settings: RateLimiterSettings,
    retry: RetryPolicy,
}

impl AdaptiveRateLimiter {
    /// 创建新的限流器
    ///
    /// # 参数
    ///
    /// * `settings` - 限流配置
    pub fn new(settings: RateLimiterSettings) -> Self {
        info!(
            max_rpm = settings.max_rpm,
            max_concurrent = settings.max_concurrent,
            max_retries = settings.max_retries,
            "Adaptive rate limiter initialized"
        );
        gauge!("rate_limiter_effective_rpm").set(settings.max_rpm as f64);

        Self {
            bucket: Mutex::new(RateBucket {
                calls: VecDeque::new(),
                effective_rpm: settings.max_rpm,
                consecutive_throttles: 0,
            }),
            semaphore: Semaphore::new(settings.max_concurrent),
            retry: RetryPolicy::throttling(&settings),
            settings,
        }
    }

    /// 当前有效的每分钟调用上限
    pub fn effective_rpm(&self) -> u32 {
        self.bucket.lock().effective_rpm
    }

    /// 连续限流次数
    pub fn consecutive_throttles(&self) -> u32 {
        self.bucket.lock().consecutive_throttles
    }

    /// 在限流保护下执行外部调用
    ///
    /// 限流错误按指数退避加全抖动重试，最多 `max_retries` 次；
    /// 认证错误立即返回；其他错误重试一次。
    /// 退避期间不占用并发许可。
    ///
    /// # 参数
    ///
    /// * `op` - 每次尝试时调用，返回一次外部调用的 future
    pub async fn execute<F, Fut, T>(&self, mut op: F) -> Result<T, RateLimitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut last_error = String::new();

        for attempt in 0..=self.settings.max_retries {
            let outcome = {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| RateLimitError::Failed("rate limiter closed".to_string()))?;
                self.acquire_token().await;
                op().await
            };

            let err = match outcome {
                Ok(value) => {
                    self.on_success();
                    return Ok(value);
                }
                Err(err) => err,
            };
            last_error = format!("{:#}", err);

            match classify_error(&err) {
                ErrorClass::Throttled => {
                    self.on_throttled();
                    if !self.retry.should_retry(attempt) {
                        error!(attempts = attempt + 1, error = %last_error, "External service still throttled after all retries");
                        return Err(RateLimitError::Throttled {
                            attempts: attempt + 1,
                            message: last_error,
                        });
                    }
                    let backoff = self.retry.calculate_backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.settings.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "External service throttled, backing off"
                    );
                    sleep(backoff).await;
                }
                ErrorClass::Auth => {
                    error!(error = %last_error, "External service auth failure, not retrying");
                    return Err(RateLimitError::Unauthorized(last_error));
                }
                ErrorClass::Other => {
                    if attempt > 0 || self.settings.max_retries == 0 {
                        return Err(RateLimitError::Failed(last_error));
                    }
                    let backoff = self.retry.calculate_backoff(0);
                    warn!(error = %last_error, backoff_ms = backoff.as_millis() as u64, "External service call failed, retrying once");
                    sleep(backoff).await;
                }
            }
        }

        Err(RateLimitError::Failed(last_error))
    }

    /// 等待令牌窗口中出现空位并占用它
    async fn acquire_token(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                let now = Instant::now();
                bucket.evict(now);
                if bucket.calls.len() < bucket.effective_rpm as usize {
                    bucket.calls.push_back(now);
                    return;
                }
                match bucket.calls.front() {
                    Some(oldest) => (*oldest + TOKEN_WINDOW).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            let jitter = Duration::from_millis(rand::random_range(100..=500));
            debug!(wait_ms = (wait + jitter).as_millis() as u64, "Token window full, waiting");
            sleep(wait + jitter).await;
        }
    }

    /// 限流响应：有效速率减半，不低于下限
    fn on_throttled(&self) {
        let mut bucket = self.bucket.lock();
        bucket.consecutive_throttles += 1;
        bucket.effective_rpm = (bucket.effective_rpm / 2).max(self.settings.min_rpm);
        counter!("rate_limiter_throttled_total").increment(1);
        gauge!("rate_limiter_effective_rpm").set(bucket.effective_rpm as f64);
        warn!(
            consecutive_throttles = bucket.consecutive_throttles,
            effective_rpm = bucket.effective_rpm,
            "Rate limiter adapting down"
        );
    }

    /// 一串失败之后的首次成功：清零计数并按恢复系数上调，不超过上限
    fn on_success(&self) {
        let mut bucket = self.bucket.lock();
        if bucket.consecutive_throttles == 0 {
            return;
        }
        bucket.consecutive_throttles = 0;
        let grown = (bucket.effective_rpm as f64 * self.settings.recovery_factor) as u32;
        bucket.effective_rpm = grown.min(self.settings.max_rpm);
        gauge!("rate_limiter_effective_rpm").set(bucket.effective_rpm as f64);
        info!(effective_rpm = bucket.effective_rpm, "Rate limiter recovering");
    }
}
