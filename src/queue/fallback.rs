// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::queue::event_bus::{BusEvent, EventBus, EventHandler};
use bytes::Bytes;
use metrics::counter;
use std::sync::Arc;
use tracing::warn;

/// 交付方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 已交给总线
    Published,
    /// 总线发布失败，已同步调用下游阶段
    Direct,
}

/// 带直连兜底的发布器
///
/// 发布失败（缓冲区耗尽、代理不可达）时，以同样的负载同步调用下一阶段的处理函数，
/// 流水线退化为一条调用链直到代理恢复，已抓取的内容不会被静默丢弃。
#[derive(Clone)]
pub struct FallbackPublisher {
    bus: Arc<dyn EventBus>,
}

impl FallbackPublisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// 发布事件，失败时直接调用 `next_stage`
    ///
    /// # 返回值
    ///
    /// * `Ok(Delivery)` - 交付方式
    /// * `Err(anyhow::Error)` - 发布失败且下游直接处理也失败
    pub async fn deliver(
        &self,
        topic: &str,
        key: &str,
        payload: Bytes,
        next_stage: &dyn EventHandler,
    ) -> anyhow::Result<Delivery> {
        if self.bus.publish(topic, key, payload.clone()).await {
            return Ok(Delivery::Published);
        }

        warn!(
            topic,
            key,
            mode = self.bus.mode(),
            next_stage = next_stage.name(),
            "Publish failed, delivering directly to next stage"
        );
        counter!("bus_fallback_total", "topic" => topic.to_string()).increment(1);

        let event = BusEvent::new(topic, key, payload);
        next_stage.handle(&event).await?;
        Ok(Delivery::Direct)
    }
}
