// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 缓存模块
///
/// Redis客户端，供 Streams 总线和任务存储共用
pub mod redis_client;
