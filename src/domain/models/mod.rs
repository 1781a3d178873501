// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了流水线的核心实体，包括：
/// - 爬取（crawl）：爬取目标、爬取结果、原始页面事件以及爬取结果分类
/// - 记录（record）：抽取后的机会记录及其去重标识
/// - 任务（mission）：带进度追踪的发现任务
pub mod crawl;
pub mod mission;
pub mod record;
