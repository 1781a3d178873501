// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

#[cfg(test)]
mod tests {
    use crate::config::settings::{BrokerMode, Settings};
    use std::fs;
    use std::time::Duration;

    #[test]
    fn test_defaults_without_config_files() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::from_sources(dir.path().to_str().unwrap(), "test").unwrap();

        assert_eq!(settings.broker.mode, BrokerMode::Memory);
        assert_eq!(settings.crawler.batch_size, 5);
        assert_eq!(settings.crawler.max_content_bytes, 200_000);
        assert_eq!(settings.rate_limiter.max_rpm, 30);
        assert_eq!(settings.rate_limiter.min_rpm, 5);
        assert_eq!(settings.rate_limiter.max_concurrent, 5);
        assert_eq!(settings.missions.failure_threshold, 3);
        assert_eq!(settings.dedup.window_secs, 3600);
        assert!(settings.database.is_none());
        assert!(settings.redis.is_none());
    }

    #[test]
    fn test_environment_file_overrides_default_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
[broker]
mode = "redis"
queue_capacity = 10

[redis]
url = "redis://127.0.0.1:6379"
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("staging.toml"),
            r#"
[broker]
queue_capacity = 20

[crawler]
commit_timeout_secs = 5
"#,
        )
        .unwrap();

        let settings = Settings::from_sources(dir.path().to_str().unwrap(), "staging").unwrap();

        assert_eq!(settings.broker.mode, BrokerMode::Redis);
        assert_eq!(settings.broker.queue_capacity, 20);
        assert_eq!(settings.redis.unwrap().url, "redis://127.0.0.1:6379");
        assert_eq!(
            settings.crawler.tier_timeouts(),
            [
                Duration::from_secs(45),
                Duration::from_secs(60),
                Duration::from_secs(5)
            ]
        );
        // 未覆盖的字段保持默认值
        assert_eq!(settings.broker.raw_topic, "cortex.raw.html.v1");
    }
}
