// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// 应用程序配置设置
///
/// 包含数据库、Redis、消息总线、爬虫、去重、限流、任务追踪等所有配置项。
/// 每个分段都有默认值，因此配置文件可以只覆盖需要修改的部分。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 数据库配置（缺省时不启用持久化记录存储）
    pub database: Option<DatabaseSettings>,
    /// Redis配置（缺省时任务状态存储退化为进程内存储）
    pub redis: Option<RedisSettings>,
    /// 消息总线配置
    pub broker: BrokerSettings,
    /// 爬虫配置
    pub crawler: CrawlerSettings,
    /// 去重配置
    pub dedup: DedupSettings,
    /// 外部抽取服务限流配置
    pub rate_limiter: RateLimiterSettings,
    /// 抽取服务配置
    pub extraction: ExtractionSettings,
    /// 任务追踪配置
    pub missions: MissionSettings,
    /// 巡逻任务配置
    pub patrol: PatrolSettings,
    /// 指标导出配置
    pub metrics: MetricsSettings,
}

/// 数据库配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// 数据库连接URL
    pub url: String,
    /// 最大连接数
    pub max_connections: Option<u32>,
    /// 最小连接数
    pub min_connections: Option<u32>,
    /// 连接超时时间（秒）
    pub connect_timeout: Option<u64>,
    /// 空闲连接超时时间（秒）
    pub idle_timeout: Option<u64>,
}

/// Redis配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis连接URL
    pub url: String,
}

/// 消息总线模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    /// 进程内有界队列
    #[default]
    Memory,
    /// Redis Streams 持久化代理
    Redis,
}

/// 消息总线配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub mode: BrokerMode,
    /// 内存队列容量
    pub queue_capacity: usize,
    /// 内存队列入队等待时间（毫秒）
    pub publish_timeout_ms: u64,
    /// 每个流保留的近似最大条数
    pub stream_maxlen: usize,
    /// 消费者组名称
    pub consumer_group: String,
    /// 消费者名称，缺省时使用 HOSTNAME
    pub consumer_name: Option<String>,
    /// 流消费者空闲轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 每次读取的最大条数
    pub read_count: usize,
    /// 写入后需要确认的副本数（0 表示不等待）
    pub replica_acks: usize,
    /// 等待副本确认的超时时间（毫秒）
    pub replica_ack_timeout_ms: u64,
    /// 是否对负载进行 gzip 压缩
    pub compression: bool,
    /// 单次发布的最长重试时间（毫秒）
    pub producer_max_elapsed_ms: u64,
    /// 单次网络请求超时（毫秒）
    pub request_timeout_ms: u64,
    /// 处理失败的条目再次投递前的等待时间（毫秒）
    pub redelivery_delay_ms: u64,
    /// 其他消费者名下空闲超过该时长的条目会被认领（毫秒，0 表示不认领）
    pub claim_idle_ms: u64,
    pub raw_topic: String,
    pub extracted_topic: String,
    pub verified_topic: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            mode: BrokerMode::Memory,
            queue_capacity: 1000,
            publish_timeout_ms: 1000,
            stream_maxlen: 100_000,
            consumer_group: "oppstream".to_string(),
            consumer_name: None,
            poll_interval_ms: 500,
            read_count: 10,
            replica_acks: 0,
            replica_ack_timeout_ms: 5000,
            compression: true,
            producer_max_elapsed_ms: 30_000,
            request_timeout_ms: 30_000,
            redelivery_delay_ms: 5_000,
            claim_idle_ms: 60_000,
            raw_topic: "cortex.raw.html.v1".to_string(),
            extracted_topic: "opportunity.enriched.v1".to_string(),
            verified_topic: "opportunity.verified.v1".to_string(),
        }
    }
}

/// 爬虫配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerSettings {
    /// 每批并发目标数
    pub batch_size: usize,
    /// 批次间隔下限（毫秒）
    pub stagger_min_ms: u64,
    /// 批次间隔上限（毫秒）
    pub stagger_max_ms: u64,
    /// 单个目标最大尝试次数
    pub max_attempts: u32,
    /// DOM 就绪等待超时（秒）
    pub dom_ready_timeout_secs: u64,
    /// 网络空闲等待超时（秒）
    pub network_idle_timeout_secs: u64,
    /// 仅提交等待超时（秒）
    pub commit_timeout_secs: u64,
    /// 交互完成后的稳定等待（毫秒）
    pub settle_ms: u64,
    /// 每次滚动后的等待（毫秒）
    pub scroll_pause_ms: u64,
    /// 滚动次数
    pub scroll_steps: u32,
    /// 每次滚动像素
    pub scroll_px: u32,
    /// 内容大小上限（字节）
    pub max_content_bytes: usize,
    /// 内容守卫最小长度
    pub min_content_len: usize,
    /// 单次抓取接受的最小内容长度
    pub fetch_min_content_len: usize,
    /// 域名黑名单
    pub blacklist: Vec<String>,
    /// 豁免最小长度检查的 API 路径片段
    pub api_path_patterns: Vec<String>,
    /// 需要拦截的跟踪域名
    pub tracker_domains: Vec<String>,
    /// 永不拦截的请求 URL 片段
    pub exempt_patterns: Vec<String>,
    /// 远程 Chrome 调试地址
    pub remote_debugging_url: Option<String>,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            stagger_min_ms: 2000,
            stagger_max_ms: 4000,
            max_attempts: 3,
            dom_ready_timeout_secs: 45,
            network_idle_timeout_secs: 60,
            commit_timeout_secs: 30,
            settle_ms: 2000,
            scroll_pause_ms: 1500,
            scroll_steps: 3,
            scroll_px: 1500,
            max_content_bytes: 200_000,
            min_content_len: 5000,
            fetch_min_content_len: 1000,
            blacklist: vec!["chegg.com".to_string()],
            api_path_patterns: vec!["/api/".to_string(), "/graphql".to_string()],
            tracker_domains: [
                "google-analytics.com",
                "googletagmanager.com",
                "doubleclick.net",
                "facebook.net",
                "hotjar.com",
                "segment.io",
                "mixpanel.com",
                "amplitude.com",
                "intercom.io",
                "sentry.io",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            exempt_patterns: vec![
                "api.".to_string(),
                "graphql".to_string(),
                "cdn-cgi".to_string(),
            ],
            remote_debugging_url: None,
        }
    }
}

impl CrawlerSettings {
    /// 三级等待策略各自的超时
    pub fn tier_timeouts(&self) -> [Duration; 3] {
        [
            Duration::from_secs(self.dom_ready_timeout_secs),
            Duration::from_secs(self.network_idle_timeout_secs),
            Duration::from_secs(self.commit_timeout_secs),
        ]
    }
}

/// 去重配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    /// 观测窗口长度（秒）
    pub window_secs: u64,
    /// 是否启用跨URL内容指纹去重
    pub fingerprint: bool,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            fingerprint: true,
        }
    }
}

/// 限流配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimiterSettings {
    /// 每分钟请求上限
    pub max_rpm: u32,
    /// 自适应下调的下限
    pub min_rpm: u32,
    /// 同时在途的最大请求数
    pub max_concurrent: usize,
    /// 限流响应的最大重试次数
    pub max_retries: u32,
    /// 退避基数（毫秒）
    pub base_backoff_ms: u64,
    /// 退避上限（毫秒）
    pub max_backoff_ms: u64,
    /// 恢复系数
    pub recovery_factor: f64,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            max_rpm: 30,
            min_rpm: 5,
            max_concurrent: 5,
            max_retries: 4,
            base_backoff_ms: 2000,
            max_backoff_ms: 60_000,
            recovery_factor: 1.25,
        }
    }
}

/// 抽取服务配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// OpenAI 兼容接口地址
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// 发送给模型的最大字符数
    pub max_input_chars: usize,
    /// 请求超时（秒）
    pub timeout_secs: u64,
    /// 是否丢弃截止日期已过的记录
    pub drop_expired: bool,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_input_chars: 60_000,
            timeout_secs: 120,
            drop_expired: true,
        }
    }
}

/// 任务追踪配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MissionSettings {
    /// 存储键
    pub key: String,
    /// 存储 TTL（秒）
    pub ttl_secs: u64,
    /// 连续失败多少次后熔断
    pub failure_threshold: u32,
    /// 熔断冷却时间（秒）
    pub cooldown_secs: u64,
    /// 已完成任务保留时间（秒）
    pub completed_retention_secs: i64,
}

impl Default for MissionSettings {
    fn default() -> Self {
        Self {
            key: "cortex:discovery:pulse".to_string(),
            ttl_secs: 3600,
            failure_threshold: 3,
            cooldown_secs: 300,
            completed_retention_secs: 120,
        }
    }
}

/// 巡逻任务配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatrolSettings {
    pub enabled: bool,
    /// 巡逻周期（秒）
    pub interval_secs: u64,
    /// 巡逻目标
    pub targets: Vec<String>,
}

impl Default for PatrolSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 120,
            targets: Vec::new(),
        }
    }
}

/// 指标导出配置设置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    /// Prometheus 监听地址
    pub listen_addr: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "0.0.0.0:9000".to_string(),
        }
    }
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次叠加 `config/default`、`config/{APP_ENVIRONMENT}` 和 `OPPSTREAM__*` 环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        Self::from_sources("config", &env)
    }

    /// 从指定目录加载配置
    ///
    /// # 参数
    ///
    /// * `dir` - 配置文件目录
    /// * `env` - 环境名称
    pub fn from_sources(dir: &str, env: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(&format!("{}/default", dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", dir, env)).required(false))
            .add_source(
                Environment::with_prefix("OPPSTREAM")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("crawler.blacklist")
                    .with_list_parse_key("patrol.targets")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
