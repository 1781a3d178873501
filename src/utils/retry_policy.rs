// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::RateLimiterSettings;
use std::time::Duration;

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 初始退避时间
    pub initial_backoff: Duration,
    /// 最大退避时间
    pub max_backoff: Duration,
    /// 退避乘数
    pub backoff_multiplier: f64,
    /// 是否启用指数退避
    pub exponential_backoff: bool,
    /// 是否启用全抖动
    pub enable_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            exponential_backoff: true,
            enable_jitter: false,
        }
    }
}

impl RetryPolicy {
    /// 页面导航重试策略：1s、2s、4s…，不加抖动
    pub fn navigation(max_attempts: u32) -> Self {
        Self {
            max_retries: max_attempts,
            ..Self::default()
        }
    }

    /// 外部服务限流重试策略：指数退避加全抖动
    pub fn throttling(settings: &RateLimiterSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.base_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            backoff_multiplier: 2.0,
            exponential_backoff: true,
            enable_jitter: true,
        }
    }

    /// 计算第 `attempt` 次失败（从 0 开始）之后的退避时间
    ///
    /// 启用抖动时返回 `[0, min(max, base * multiplier^attempt))` 内的均匀随机值
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let capped = self.backoff_ceiling(attempt);

        if self.enable_jitter && capped > 0.0 {
            Duration::from_secs_f64(rand::random_range(0.0..capped))
        } else {
            Duration::from_secs_f64(capped)
        }
    }

    /// 不含抖动的退避上界（秒）
    fn backoff_ceiling(&self, attempt: u32) -> f64 {
        if !self.exponential_backoff {
            return self.initial_backoff.as_secs_f64();
        }

        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        backoff_secs.min(self.max_backoff.as_secs_f64())
    }

    /// 是否应该重试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}
