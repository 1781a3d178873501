// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 数据库模块
///
/// 已验证记录的持久化：连接与迁移，以及 SeaORM 实体
pub mod connection;
pub mod entities;
