// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域层模块
///
/// 该模块包含系统的核心业务逻辑，包括：
/// - 领域模型（models）：爬取目标、机会记录和任务
/// - 仓库接口（repositories）：记录持久化和任务状态存储的抽象
/// - 服务（services）：流水线各环节的业务规则
pub mod models;
pub mod repositories;
pub mod services;
