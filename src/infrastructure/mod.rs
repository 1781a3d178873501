// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 领域抽象的具体实现：
/// - 缓存（cache）：Redis客户端
/// - 数据库（database）：连接池和实体映射
/// - 指标（metrics）：Prometheus 导出器
/// - 仓库实现（repositories）：记录仓库和任务存储
pub mod cache;
pub mod database;
pub mod metrics;
pub mod repositories;
