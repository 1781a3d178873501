// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 流水线各环节的核心逻辑，不依赖具体的总线或浏览器实现。
///
/// 包含的服务：
/// - 爬取服务（crawl_service）：分批爬取目标并把页面交给下游
/// - 去重服务（dedup_service）：基于标识和内容指纹的去重判定
/// - LLM服务（llm_service）：调用外部模型抽取结构化记录
/// - 任务服务（mission_service）：任务进度追踪和存储熔断
/// - 限流服务（rate_limiting_service）：外部调用的自适应限流
pub mod crawl_service;
pub mod dedup_service;
pub mod llm_service;
pub mod mission_service;
pub mod rate_limiting_service;
