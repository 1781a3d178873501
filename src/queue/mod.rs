// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// 事件总线抽象、进程内与 Redis Streams 两种实现，以及发布失败时的直连兜底
pub mod event_bus;
pub mod fallback;
pub mod memory_bus;
pub mod redis_stream_bus;
