// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::utils::errors::WorkerError;
use async_trait::async_trait;

/// 长期运行的后台工作器
///
/// 由 `WorkerManager` 在独立任务中运行，`run` 正常返回表示工作器主动退出
#[async_trait]
pub trait Worker: Send + Sync {
    /// 运行工作器主循环
    async fn run(&self) -> Result<(), WorkerError>;

    /// 工作器名称，用于日志
    fn name(&self) -> &str;
}
