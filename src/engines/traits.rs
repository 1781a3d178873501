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

use crate::engines::stealth::Fingerprint;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// 引擎错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    /// 浏览器启动或连接失败
    #[error("Browser launch failed: {0}")]
    Launch(String),
    /// 会话创建或配置失败
    #[error("Session error: {0}")]
    Session(String),
    /// 导航失败
    #[error("Navigation failed: {0}")]
    Navigation(String),
    /// 超时
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    /// 内容过少
    #[error("Content too thin: {len} < {min}")]
    ThinContent { len: usize, min: usize },
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

impl EngineError {
    /// 判断错误是否可重试
    ///
    /// # 返回值
    ///
    /// 如果错误是可重试的则返回true，否则返回false
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Navigation(_)
            | EngineError::Timeout(_)
            | EngineError::Session(_)
            | EngineError::ThinContent { .. } => true,
            EngineError::Launch(_) | EngineError::Other(_) => false,
        }
    }
}

impl From<chromiumoxide::error::CdpError> for EngineError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        EngineError::Session(err.to_string())
    }
}

/// 导航等待策略，按代价从低到高排列的三级退化链
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitStrategy {
    /// 等待 DOM 就绪
    DomReady,
    /// 等待网络空闲
    NetworkIdle,
    /// 仅等待导航提交
    Commit,
}

impl WaitStrategy {
    /// 三级策略的尝试顺序
    pub const TIERS: [WaitStrategy; 3] = [
        WaitStrategy::DomReady,
        WaitStrategy::NetworkIdle,
        WaitStrategy::Commit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WaitStrategy::DomReady => "dom_ready",
            WaitStrategy::NetworkIdle => "network_idle",
            WaitStrategy::Commit => "commit",
        }
    }
}

impl fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 浏览器会话
///
/// 一个会话只属于一个抓取任务，用完必须调用 [`BrowserSession::close`]
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// 按指定策略导航到目标地址
    ///
    /// 超时由调用方控制，实现只负责等待策略本身
    async fn navigate(&mut self, url: &str, wait: WaitStrategy) -> Result<(), EngineError>;

    /// 移动鼠标指针
    async fn move_pointer(&mut self, x: f64, y: f64) -> Result<(), EngineError>;

    /// 垂直滚动页面
    async fn scroll_by(&mut self, pixels: u32) -> Result<(), EngineError>;

    /// 读取页面标题
    async fn title(&mut self) -> Result<String, EngineError>;

    /// 读取页面 HTML
    async fn content(&mut self) -> Result<String, EngineError>;

    /// 释放会话占用的全部浏览器资源
    async fn close(self: Box<Self>);
}

/// 会话工厂
///
/// 每次调用产生一个带独立指纹的隔离会话
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, fingerprint: &Fingerprint) -> Result<Box<dyn BrowserSession>, EngineError>;
}
