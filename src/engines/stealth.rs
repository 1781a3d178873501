// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use rand::seq::IndexedRandom;
use serde_json::{json, Value};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1536, 864), (1440, 900), (1366, 768)];

const LOCALES: &[&str] = &["en-US", "en-GB"];

const TIMEZONES: &[&str] = &["America/New_York", "America/Los_Angeles", "Europe/London"];

/// 在每个新文档执行前注入的反检测脚本
pub const STEALTH_INIT_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(document, 'visibilityState', { get: () => 'visible' });
Object.defineProperty(document, 'hidden', { get: () => false });
Object.defineProperty(navigator, 'hardwareConcurrency', { get: () => 8 });
Object.defineProperty(navigator, 'deviceMemory', { get: () => 8 });
if (window.chrome) { window.chrome.runtime = {}; }
const originalQuery = window.navigator.permissions.query;
window.navigator.permissions.query = (parameters) => (
    parameters.name === 'notifications'
        ? Promise.resolve({ state: Notification.permission })
        : originalQuery(parameters)
);
"#;

/// 会话指纹
///
/// 每个抓取任务随机抽取一份，降低批量请求之间的关联性
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub locale: String,
    pub timezone: String,
}

impl Fingerprint {
    /// 从预置池中随机组合一份指纹
    pub fn random() -> Self {
        let mut rng = rand::rng();
        Self {
            user_agent: USER_AGENTS.choose(&mut rng).unwrap_or(&USER_AGENTS[0]).to_string(),
            viewport: *VIEWPORTS.choose(&mut rng).unwrap_or(&VIEWPORTS[0]),
            locale: LOCALES.choose(&mut rng).unwrap_or(&LOCALES[0]).to_string(),
            timezone: TIMEZONES.choose(&mut rng).unwrap_or(&TIMEZONES[0]).to_string(),
        }
    }

    /// 由 User-Agent 推断的平台名，用于 sec-ch-ua-platform
    pub fn platform(&self) -> &'static str {
        if self.user_agent.contains("Windows") {
            "Windows"
        } else if self.user_agent.contains("Macintosh") {
            "macOS"
        } else {
            "Linux"
        }
    }

    pub fn accept_language(&self) -> String {
        let primary = self.locale.split('-').next().unwrap_or("en");
        format!("{},{};q=0.9", self.locale, primary)
    }

    /// 随导航请求发送的真实浏览器请求头
    pub fn headers(&self) -> Value {
        let mut headers = json!({
            "Accept-Language": self.accept_language(),
            "Accept": "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
            "Sec-Fetch-Dest": "document",
            "Sec-Fetch-Mode": "navigate",
            "Sec-Fetch-Site": "none",
            "Sec-Fetch-User": "?1",
            "Upgrade-Insecure-Requests": "1",
        });
        // 只有 Chromium 内核才发送客户端提示头
        if self.user_agent.contains("Chrome/") {
            headers["Sec-Ch-Ua"] =
                json!(r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#);
            headers["Sec-Ch-Ua-Mobile"] = json!("?0");
            headers["Sec-Ch-Ua-Platform"] = json!(format!("\"{}\"", self.platform()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_fingerprint_uses_pools() {
        for _ in 0..20 {
            let fp = Fingerprint::random();
            assert!(USER_AGENTS.contains(&fp.user_agent.as_str()));
            assert!(VIEWPORTS.contains(&fp.viewport));
            assert!(TIMEZONES.contains(&fp.timezone.as_str()));
        }
    }

    #[test]
    fn test_client_hints_only_for_chromium() {
        let mut fp = Fingerprint {
            user_agent: USER_AGENTS[0].to_string(),
            viewport: (1920, 1080),
            locale: "en-US".to_string(),
            timezone: "Europe/London".to_string(),
        };
        let headers = fp.headers();
        assert_eq!(headers["Sec-Ch-Ua-Platform"], "\"Windows\"");
        assert_eq!(headers["Accept-Language"], "en-US,en;q=0.9");

        fp.user_agent = USER_AGENTS[2].to_string();
        assert!(fp.headers().get("Sec-Ch-Ua").is_none());
    }
}
