// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库实现模块
///
/// 提供领域仓库接口的具体实现：
/// 机会记录的数据库仓库，以及 Redis 和进程内两种任务状态存储
pub mod mission_store_impl;
pub mod record_repo_impl;
