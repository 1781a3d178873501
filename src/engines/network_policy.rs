// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::CrawlerSettings;

/// 被拦截的重资源类型
const HEAVY_RESOURCE_TYPES: &[&str] = &["image", "media", "font"];

/// 网络层请求拦截策略
///
/// 拦截重资源和跟踪脚本，但放行数据接口流量
#[derive(Debug, Clone)]
pub struct NetworkPolicy {
    tracker_domains: Vec<String>,
    exempt_patterns: Vec<String>,
}

impl NetworkPolicy {
    pub fn new(tracker_domains: Vec<String>, exempt_patterns: Vec<String>) -> Self {
        Self {
            tracker_domains: tracker_domains.into_iter().map(|d| d.to_lowercase()).collect(),
            exempt_patterns: exempt_patterns.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    pub fn from_settings(settings: &CrawlerSettings) -> Self {
        Self::new(
            settings.tracker_domains.clone(),
            settings.exempt_patterns.clone(),
        )
    }

    /// 判断请求是否应被拦截
    ///
    /// # 参数
    ///
    /// * `url` - 请求地址
    /// * `resource_type` - 资源类型（小写，如 `image`、`xhr`）
    ///
    /// # 返回值
    ///
    /// 需要拦截返回 true
    pub fn should_block(&self, url: &str, resource_type: &str) -> bool {
        let resource_type = resource_type.to_lowercase();
        if HEAVY_RESOURCE_TYPES.contains(&resource_type.as_str()) {
            return true;
        }

        let url = url.to_lowercase();
        if self.exempt_patterns.iter().any(|p| url.contains(p)) {
            return false;
        }
        self.tracker_domains.iter().any(|d| url.contains(d))
    }
}
