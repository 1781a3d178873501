// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::CrawlerSettings;
use crate::domain::models::crawl::RejectReason;
use url::Url;

/// 内容守卫
///
/// 发布前的最后一道质量检查。拒绝不是错误，只代表“没有可提取的内容”，
/// 调用方不会重试被拒绝的目标。
#[derive(Debug, Clone)]
pub struct ContentGuard {
    blacklist: Vec<String>,
    api_path_patterns: Vec<String>,
    min_content_len: usize,
    max_content_bytes: usize,
}

impl ContentGuard {
    pub fn from_settings(settings: &CrawlerSettings) -> Self {
        Self {
            blacklist: settings.blacklist.iter().map(|d| d.to_lowercase()).collect(),
            api_path_patterns: settings.api_path_patterns.clone(),
            min_content_len: settings.min_content_len,
            max_content_bytes: settings.max_content_bytes,
        }
    }

    /// 检查目标域名是否被列入黑名单
    ///
    /// 在打开浏览器会话之前调用，避免为死链浪费资源
    pub fn check_target(&self, url: &str) -> Result<(), RejectReason> {
        let lowered = url.to_lowercase();
        let host = Url::parse(&lowered)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));

        for domain in &self.blacklist {
            let hit = match &host {
                Some(host) => host == domain || host.ends_with(&format!(".{}", domain)),
                None => lowered.contains(domain.as_str()),
            };
            if hit {
                return Err(RejectReason::Blacklisted(domain.clone()));
            }
        }
        Ok(())
    }

    /// 检查抓取到的页面
    ///
    /// # 参数
    ///
    /// * `url` - 页面地址
    /// * `title` - 页面标题
    /// * `content` - 页面 HTML
    ///
    /// # 返回值
    ///
    /// * `Ok(())` - 页面可以发布
    /// * `Err(RejectReason)` - 拒绝原因
    pub fn inspect(&self, url: &str, title: &str, content: &str) -> Result<(), RejectReason> {
        self.check_target(url)?;

        let lowered_title = title.to_lowercase();
        if lowered_title.contains("not found") || lowered_title.contains("404") {
            return Err(RejectReason::NotFoundTitle(title.to_string()));
        }

        if content.len() < self.min_content_len && !self.is_api_endpoint(url) {
            return Err(RejectReason::ThinContent {
                len: content.len(),
                min: self.min_content_len,
            });
        }
        Ok(())
    }

    /// URL 是否命中 API 路径模式（这类响应天然很短）
    pub fn is_api_endpoint(&self, url: &str) -> bool {
        self.api_path_patterns.iter().any(|p| url.contains(p.as_str()))
    }

    /// 按字节上限截断内容，保证落在字符边界上
    pub fn cap(&self, mut content: String) -> String {
        if content.len() > self.max_content_bytes {
            let mut end = self.max_content_bytes;
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            content.truncate(end);
        }
        content
    }
}
