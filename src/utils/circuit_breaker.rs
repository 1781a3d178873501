// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// 熔断器配置
#[derive(Clone, Debug)]
pub struct CircuitConfig {
    /// 连续失败阈值
    pub failure_threshold: u32,
    /// 打开后的冷却时间
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// 熔断器状态枚举
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    /// 关闭状态
    Closed,
    /// 打开状态
    Open,
    /// 半开状态
    HalfOpen,
}

#[derive(Debug)]
struct CircuitState {
    status: Status,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    total_failures: u64,
    total_successes: u64,
    total_rejected: u64,
}

/// 熔断器统计信息
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CircuitStats {
    /// 是否处于打开状态
    pub is_open: bool,
    /// 当前连续失败次数
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    /// 打开期间被拒绝的调用数
    pub total_rejected: u64,
}

/// 连续失败熔断器
///
/// 连续失败达到阈值后打开，冷却期内拒绝所有调用；冷却结束进入半开状态，
/// 放行的下一次调用成功则关闭，失败则重新打开并重新计时。
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    /// 创建熔断器
    ///
    /// # 参数
    ///
    /// * `name` - 名称，用作指标标签
    /// * `config` - 配置
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitState {
                status: Status::Closed,
                consecutive_failures: 0,
                opened_at: None,
                total_failures: 0,
                total_successes: 0,
                total_rejected: 0,
            }),
        }
    }

    /// 判断调用是否应被放行
    ///
    /// # 返回值
    ///
    /// 熔断器打开且仍在冷却期内返回 false
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();
        match state.status {
            Status::Closed | Status::HalfOpen => true,
            Status::Open => {
                let cooled = state
                    .opened_at
                    .is_none_or(|opened| opened.elapsed() >= self.config.cooldown);
                if cooled {
                    state.status = Status::HalfOpen;
                    self.update_status_metric(Status::HalfOpen);
                    true
                } else {
                    state.total_rejected += 1;
                    counter!("circuit_breaker_rejected_total", "breaker" => self.name.clone())
                        .increment(1);
                    false
                }
            }
        }
    }

    /// 记录成功
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.total_successes += 1;
        state.consecutive_failures = 0;
        if state.status != Status::Closed {
            state.status = Status::Closed;
            state.opened_at = None;
            self.update_status_metric(Status::Closed);
        }
    }

    /// 记录失败
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.total_failures += 1;
        state.consecutive_failures += 1;
        counter!("circuit_breaker_failures_total", "breaker" => self.name.clone()).increment(1);

        let trip = match state.status {
            Status::HalfOpen => true,
            Status::Closed => state.consecutive_failures >= self.config.failure_threshold,
            Status::Open => false,
        };
        if trip {
            state.status = Status::Open;
            state.opened_at = Some(Instant::now());
            self.update_status_metric(Status::Open);
            tracing::warn!(
                breaker = %self.name,
                failures = state.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit breaker opened"
            );
        }
    }

    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    /// 获取统计信息
    pub fn stats(&self) -> CircuitStats {
        let state = self.state.lock();
        CircuitStats {
            is_open: state.status == Status::Open,
            consecutive_failures: state.consecutive_failures,
            total_failures: state.total_failures,
            total_successes: state.total_successes,
            total_rejected: state.total_rejected,
        }
    }

    fn update_status_metric(&self, status: Status) {
        let val = match status {
            Status::Closed => 0.0,
            Status::Open => 1.0,
            Status::HalfOpen => 0.5,
        };
        gauge!("circuit_breaker_status", "breaker" => self.name.clone()).set(val);
    }
}
