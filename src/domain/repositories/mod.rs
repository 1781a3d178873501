// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库接口模块
///
/// 定义持久化记录存储和任务状态存储的抽象接口
pub mod mission_store;
pub mod record_repository;
