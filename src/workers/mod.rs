// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 流水线的订阅阶段（抽取、去重）、周期性巡逻工作器，
/// 以及负责启动和关闭它们的工作管理器
pub mod dedup_worker;
pub mod extraction_worker;
pub mod manager;
pub mod patrol_worker;
pub mod worker;

pub use worker::Worker;
