// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::queue::event_bus::{EventBus, EventHandler};
use crate::utils::errors::WorkerError;
use crate::workers::worker::Worker;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 工作管理器
///
/// 持有事件总线和后台工作器：先注册各阶段的订阅，再启动总线和工作器，
/// 收到关闭信号后中止工作器并停止总线
pub struct WorkerManager {
    bus: Arc<dyn EventBus>,
    workers: Vec<Arc<dyn Worker>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerManager {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            workers: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// 为主题注册流水线阶段
    pub async fn subscribe(&self, topic: &str, stage: Arc<dyn EventHandler>) {
        info!(topic, stage = stage.name(), "Subscribing pipeline stage");
        self.bus.subscribe(topic, stage).await;
    }

    /// 添加后台工作器，在 `start` 时启动
    pub fn add_worker(&mut self, worker: Arc<dyn Worker>) {
        self.workers.push(worker);
    }

    /// 启动总线和全部工作器
    ///
    /// 总线无法启动时返回错误，工作器不会被启动
    pub async fn start(&mut self) -> Result<(), WorkerError> {
        self.bus
            .start()
            .await
            .map_err(|e| WorkerError::BusError(e.to_string()))?;
        info!(mode = self.bus.mode(), "Event bus started");

        for worker in self.workers.drain(..) {
            info!(worker = worker.name(), "Starting worker");
            let handle = tokio::spawn(async move {
                match worker.run().await {
                    Ok(()) => info!(worker = worker.name(), "Worker exited"),
                    Err(e) => error!(worker = worker.name(), error = %e, "Worker failed"),
                }
            });
            self.handles.push(handle);
        }
        Ok(())
    }

    /// 等待 Ctrl+C 后关闭
    pub async fn wait_for_shutdown(&mut self) {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
        self.shutdown().await;
    }

    /// 中止工作器并停止总线，正在处理的事件会先完成
    pub async fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        self.bus.stop().await;
        info!("Workers stopped");
    }
}
