// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含核心业务实体、服务和仓库接口
pub mod domain;

/// 引擎模块
///
/// 浏览器会话、隐身指纹、网络拦截和内容质量检查
pub mod engines;

/// 基础设施模块
///
/// 提供外部服务集成，如数据库、缓存和指标导出
pub mod infrastructure;

/// 队列模块
///
/// 实现事件总线和发布兜底
pub mod queue;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

/// 工作器模块
///
/// 实现流水线阶段和后台工作器管理
pub mod workers;
