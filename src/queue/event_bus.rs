// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// 总线错误类型
#[derive(Error, Debug)]
pub enum BusError {
    /// 总线未启动
    #[error("Event bus is not running")]
    NotRunning,

    /// 代理不可用
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// 负载编解码失败
    #[error("Payload codec error: {0}")]
    Codec(String),
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        BusError::Unavailable(err.to_string())
    }
}

/// 总线事件
///
/// 负载对总线是不透明的字节串，以字符串键标识（这里是来源URL）
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub topic: String,
    pub key: String,
    pub payload: Bytes,
}

impl BusEvent {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Bytes) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
        }
    }
}

/// 事件处理器特质
///
/// 下游阶段既注册为订阅者，也作为发布失败时的直接调用目标
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理一个事件
    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()>;

    /// 处理器名称
    fn name(&self) -> &str;
}

/// 事件总线特质
#[async_trait]
pub trait EventBus: Send + Sync {
    /// 发布事件，成功交给总线返回 `true`
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> bool;

    /// 注册主题处理器
    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>);

    /// 启动分发循环
    async fn start(&self) -> Result<(), BusError>;

    /// 停止分发循环，等待正在处理的事件完成
    async fn stop(&self);

    /// 实现名称，用于日志和指标
    fn mode(&self) -> &'static str;
}

/// 主题到处理器列表的注册表，两种总线实现共用
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>>,
}

impl HandlerRegistry {
    pub fn register(&self, topic: &str, handler: Arc<dyn EventHandler>) {
        self.inner
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    pub fn handlers_for(&self, topic: &str) -> Vec<Arc<dyn EventHandler>> {
        self.inner.read().get(topic).cloned().unwrap_or_default()
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// 并发调用主题下的全部处理器并等待全部结束
    ///
    /// 单个处理器的错误或 panic 只记录日志，不影响其他处理器；
    /// 返回是否全部成功
    pub async fn dispatch(&self, event: &BusEvent) -> bool {
        let handlers = self.handlers_for(&event.topic);
        if handlers.is_empty() {
            debug!(topic = %event.topic, key = %event.key, "No handlers registered for topic");
            return true;
        }

        let results = join_all(handlers.iter().map(|handler| async move {
            match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    error!(
                        handler = handler.name(),
                        topic = %event.topic,
                        key = %event.key,
                        error = %e,
                        "Event handler failed"
                    );
                    false
                }
                Err(_) => {
                    error!(
                        handler = handler.name(),
                        topic = %event.topic,
                        key = %event.key,
                        "Event handler panicked"
                    );
                    false
                }
            }
        }))
        .await;

        results.into_iter().all(|ok| ok)
    }
}
