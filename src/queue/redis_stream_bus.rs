// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::BrokerSettings;
use crate::infrastructure::cache::redis_client::RedisClient;
use crate::queue::event_bus::{BusError, BusEvent, EventBus, EventHandler, HandlerRegistry};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use metrics::counter;
use redis::streams::{
    StreamAutoClaimReply, StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

const ENCODING_GZIP: &str = "gzip";
const ENCODING_IDENTITY: &str = "identity";

/// 编码负载，返回编码后的字节和编码名
pub fn encode_payload(payload: &[u8], compress: bool) -> Result<(Vec<u8>, &'static str), BusError> {
    if !compress {
        return Ok((payload.to_vec(), ENCODING_IDENTITY));
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder
        .write_all(payload)
        .and_then(|_| encoder.finish())
        .map(|body| (body, ENCODING_GZIP))
        .map_err(|e| BusError::Codec(e.to_string()))
}

/// 按编码名解码负载
pub fn decode_payload(body: Vec<u8>, encoding: &str) -> Result<Bytes, BusError> {
    match encoding {
        ENCODING_GZIP => {
            let mut decoded = Vec::new();
            GzDecoder::new(body.as_slice())
                .read_to_end(&mut decoded)
                .map_err(|e| BusError::Codec(e.to_string()))?;
            Ok(Bytes::from(decoded))
        }
        ENCODING_IDENTITY => Ok(Bytes::from(body)),
        other => Err(BusError::Codec(format!("unknown encoding: {}", other))),
    }
}

fn decode_entry(topic: &str, entry: &StreamId) -> Result<BusEvent, BusError> {
    let key: String = entry
        .get("key")
        .ok_or_else(|| BusError::Codec(format!("entry {} has no key", entry.id)))?;
    let encoding: String = entry
        .get("encoding")
        .unwrap_or_else(|| ENCODING_IDENTITY.to_string());
    let body: Vec<u8> = entry
        .get("payload")
        .ok_or_else(|| BusError::Codec(format!("entry {} has no payload", entry.id)))?;
    Ok(BusEvent::new(topic, key, decode_payload(body, &encoding)?))
}

/// 基于 Redis Streams 的持久化事件总线
///
/// 生产端：`XADD` 带近似 `MAXLEN`，可选 `WAIT` 等待副本确认，gzip 压缩，
/// 失败按指数退避重试。消费端：每个主题一个消费者组，处理器全部成功后才 `XACK`，
/// 启动时先重放本消费者的待确认条目，处理失败的条目延迟后再次重放，
/// 其他消费者名下空闲过久的条目用 `XAUTOCLAIM` 认领，因此是至少一次投递。
pub struct RedisStreamBus {
    redis: RedisClient,
    settings: BrokerSettings,
    consumer_name: String,
    registry: HandlerRegistry,
    shutdown: watch::Sender<bool>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl RedisStreamBus {
    /// 创建 Redis Streams 总线
    ///
    /// # 参数
    ///
    /// * `redis` - Redis客户端
    /// * `settings` - 总线配置
    pub fn new(redis: RedisClient, settings: BrokerSettings) -> Self {
        let consumer_name = settings.consumer_name.clone().unwrap_or_else(|| {
            std::env::var("HOSTNAME").unwrap_or_else(|_| "oppstream".to_string())
        });
        let (shutdown, _) = watch::channel(false);
        Self {
            redis,
            settings,
            consumer_name,
            registry: HandlerRegistry::default(),
            shutdown,
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// 写入一条流记录，超时或副本确认不足都视为失败
    async fn append(&self, topic: &str, fields: &[(&str, Vec<u8>)]) -> Result<String, BusError> {
        let write = async {
            let mut con = self.redis.connection().await?;
            let id: String = con
                .xadd_maxlen(
                    topic,
                    StreamMaxlen::Approx(self.settings.stream_maxlen),
                    "*",
                    fields,
                )
                .await?;

            if self.settings.replica_acks > 0 {
                let acked: usize = redis::cmd("WAIT")
                    .arg(self.settings.replica_acks)
                    .arg(self.settings.replica_ack_timeout_ms)
                    .query_async(&mut con)
                    .await?;
                if acked < self.settings.replica_acks {
                    return Err(BusError::Unavailable(format!(
                        "{} of {} replicas acknowledged {}",
                        acked, self.settings.replica_acks, id
                    )));
                }
            }
            Ok(id)
        };

        timeout(Duration::from_millis(self.settings.request_timeout_ms), write)
            .await
            .map_err(|_| BusError::Unavailable("stream write timed out".to_string()))?
    }

    async fn ensure_group(&self, topic: &str) -> Result<(), BusError> {
        let mut con = self.redis.connection().await?;
        let created: redis::RedisResult<()> = con
            .xgroup_create_mkstream(topic, &self.settings.consumer_group, "0")
            .await;
        match created {
            Ok(()) => {
                info!(topic, group = %self.settings.consumer_group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EventBus for RedisStreamBus {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> bool {
        let (body, encoding) = match encode_payload(&payload, self.settings.compression) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(topic, key, error = %e, "Failed to encode payload");
                return false;
            }
        };
        let fields = [
            ("key", key.as_bytes().to_vec()),
            ("encoding", encoding.as_bytes().to_vec()),
            ("payload", body),
        ];

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_secs(2))
            .with_max_elapsed_time(Some(Duration::from_millis(
                self.settings.producer_max_elapsed_ms,
            )))
            .build();

        let this = self;
        let fields = &fields;
        let result = backoff::future::retry(policy, move || async move {
            this.append(topic, fields).await.map_err(|e| {
                debug!(topic, error = %e, "Stream write failed, retrying");
                backoff::Error::transient(e)
            })
        })
        .await;

        match result {
            Ok(id) => {
                debug!(topic, key, id = %id, "Event appended to stream");
                counter!("bus_publish_total", "mode" => "redis", "result" => "ok").increment(1);
                true
            }
            Err(e) => {
                warn!(topic, key, error = %e, "Stream publish failed");
                counter!("bus_publish_total", "mode" => "redis", "result" => "error")
                    .increment(1);
                false
            }
        }
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) {
        info!(topic, handler = handler.name(), "Handler subscribed");
        self.registry.register(topic, handler);
    }

    async fn start(&self) -> Result<(), BusError> {
        let mut consumers = self.consumers.lock().await;
        if !consumers.is_empty() {
            return Ok(());
        }
        self.shutdown.send_replace(false);

        for topic in self.registry.topics() {
            self.ensure_group(&topic).await?;
            let consumer = StreamConsumer {
                redis: self.redis.clone(),
                registry: self.registry.clone(),
                topic: topic.clone(),
                group: self.settings.consumer_group.clone(),
                name: self.consumer_name.clone(),
                read_count: self.settings.read_count,
                poll_interval: Duration::from_millis(self.settings.poll_interval_ms),
                redelivery_delay: Duration::from_millis(self.settings.redelivery_delay_ms),
                claim_idle: (self.settings.claim_idle_ms > 0)
                    .then(|| Duration::from_millis(self.settings.claim_idle_ms)),
            };
            let shutdown = self.shutdown.subscribe();
            consumers.push(tokio::spawn(consumer.run(shutdown)));
            info!(topic = %topic, consumer = %self.consumer_name, "Stream consumer started");
        }
        Ok(())
    }

    async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handles: Vec<_> = self.consumers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Stream consumer ended abnormally");
            }
        }
    }

    fn mode(&self) -> &'static str {
        "redis"
    }
}

/// 消费游标计划
///
/// 启动时从 `0` 重放本消费者名下的待确认条目，读到空批次后切换到 `>` 读取新条目。
/// 处理失败的条目留在待确认列表里，`redelivery_delay` 后回到 `0` 再重放一次。
#[derive(Debug)]
struct ReadPlan {
    cursor: String,
    replaying: bool,
    retry_at: Option<Instant>,
    redelivery_delay: Duration,
    claim_idle: Option<Duration>,
    last_claim: Instant,
}

impl ReadPlan {
    fn new(redelivery_delay: Duration, claim_idle: Option<Duration>, now: Instant) -> Self {
        Self {
            cursor: "0".to_string(),
            replaying: true,
            retry_at: None,
            redelivery_delay,
            claim_idle,
            last_claim: now,
        }
    }

    fn cursor(&self) -> &str {
        &self.cursor
    }

    /// 批次处理完毕；重放时游标推进到本批最后一条之后
    fn advance(&mut self, last_id: Option<&str>) {
        if let (true, Some(id)) = (self.replaying, last_id) {
            self.cursor = id.to_string();
        }
    }

    /// 读到空批次，重放中则切换到新条目，返回是否刚结束重放
    fn finish_replay(&mut self) -> bool {
        if !self.replaying {
            return false;
        }
        self.replaying = false;
        self.cursor = ">".to_string();
        true
    }

    fn on_failure(&mut self, now: Instant) {
        self.retry_at.get_or_insert(now + self.redelivery_delay);
    }

    /// 失败条目的重投时间到了就回到待确认列表开头
    fn rewind_if_due(&mut self, now: Instant) -> bool {
        match self.retry_at {
            Some(at) if !self.replaying && now >= at => {
                self.retry_at = None;
                self.replay();
                true
            }
            _ => false,
        }
    }

    fn replay(&mut self) {
        self.cursor = "0".to_string();
        self.replaying = true;
    }

    /// 距上次认领超过空闲阈值时返回阈值，并记下本次认领时间
    fn claim_due(&mut self, now: Instant) -> Option<Duration> {
        let idle = self.claim_idle?;
        if now.duration_since(self.last_claim) < idle {
            return None;
        }
        self.last_claim = now;
        Some(idle)
    }
}

/// 单个主题的消费循环
struct StreamConsumer {
    redis: RedisClient,
    registry: HandlerRegistry,
    topic: String,
    group: String,
    name: String,
    read_count: usize,
    poll_interval: Duration,
    redelivery_delay: Duration,
    claim_idle: Option<Duration>,
}

impl StreamConsumer {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut plan = ReadPlan::new(self.redelivery_delay, self.claim_idle, Instant::now());

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = Instant::now();
            if let Some(min_idle) = plan.claim_due(now) {
                match self.claim(min_idle).await {
                    Ok(0) => {}
                    Ok(claimed) => {
                        info!(topic = %self.topic, claimed, "Claimed idle entries from other consumers");
                        plan.replay();
                    }
                    Err(e) => {
                        warn!(topic = %self.topic, error = %e, "Failed to claim idle entries");
                    }
                }
            }
            if plan.rewind_if_due(now) {
                debug!(topic = %self.topic, "Replaying entries left pending by failed handlers");
            }

            let entries = match self.read(plan.cursor()).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "Stream read failed");
                    if idle(&mut shutdown, self.poll_interval).await {
                        break;
                    }
                    continue;
                }
            };

            if entries.is_empty() {
                if plan.finish_replay() {
                    info!(topic = %self.topic, "Pending entries replayed");
                    continue;
                }
                if idle(&mut shutdown, self.poll_interval).await {
                    break;
                }
                continue;
            }

            for entry in &entries {
                let handled = match decode_entry(&self.topic, entry) {
                    Ok(event) => self.registry.dispatch(&event).await,
                    Err(e) => {
                        error!(topic = %self.topic, id = %entry.id, error = %e, "Dropping malformed stream entry");
                        true
                    }
                };

                if handled {
                    if let Err(e) = self.ack(&entry.id).await {
                        warn!(topic = %self.topic, id = %entry.id, error = %e, "Failed to ack stream entry");
                    }
                } else {
                    warn!(topic = %self.topic, id = %entry.id, "Entry left pending for redelivery");
                    plan.on_failure(Instant::now());
                }
            }

            plan.advance(entries.last().map(|entry| entry.id.as_str()));
        }
        info!(topic = %self.topic, "Stream consumer stopped");
    }

    /// 把其他消费者名下空闲过久的条目转到本消费者名下
    async fn claim(&self, min_idle: Duration) -> Result<usize, BusError> {
        let mut con = self.redis.connection().await?;
        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.topic)
            .arg(&self.group)
            .arg(&self.name)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(self.read_count)
            .query_async(&mut con)
            .await?;
        Ok(reply.claimed.len())
    }

    async fn read(&self, cursor: &str) -> Result<Vec<StreamId>, BusError> {
        let mut con = self.redis.connection().await?;
        let options = StreamReadOptions::default()
            .group(&self.group, &self.name)
            .count(self.read_count);
        let reply: StreamReadReply = con
            .xread_options(&[self.topic.as_str()], &[cursor], &options)
            .await?;
        Ok(reply.keys.into_iter().flat_map(|key| key.ids).collect())
    }

    async fn ack(&self, id: &str) -> Result<(), BusError> {
        let mut con = self.redis.connection().await?;
        let _: usize = con.xack(&self.topic, &self.group, &[id]).await?;
        Ok(())
    }
}

/// 空闲等待，收到停止信号返回 `true`
async fn idle(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        _ = sleep(duration) => *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;

    #[test]
    fn test_payload_codec() {
        let payload = br#"{"url":"https://devpost.com","html":"<html>...</html>"}"#.repeat(20);

        let (gzipped, encoding) = encode_payload(&payload, true).unwrap();
        assert_eq!(encoding, "gzip");
        assert!(gzipped.len() < payload.len());
        assert_eq!(decode_payload(gzipped, encoding).unwrap(), Bytes::from(payload.clone()));

        let (plain, encoding) = encode_payload(&payload, false).unwrap();
        assert_eq!(encoding, "identity");
        assert_eq!(plain, payload);

        assert!(decode_payload(b"x".to_vec(), "snappy").is_err());
    }

    #[test]
    fn test_read_plan_replays_then_reads_new_entries() {
        let now = Instant::now();
        let mut plan = ReadPlan::new(Duration::from_secs(5), None, now);
        assert_eq!(plan.cursor(), "0");

        plan.advance(Some("1700000000000-3"));
        assert_eq!(plan.cursor(), "1700000000000-3");

        assert!(plan.finish_replay());
        assert_eq!(plan.cursor(), ">");
        assert!(!plan.finish_replay());

        plan.advance(Some("1700000000000-9"));
        assert_eq!(plan.cursor(), ">");
    }

    #[test]
    fn test_read_plan_rewinds_after_handler_failure() {
        let now = Instant::now();
        let mut plan = ReadPlan::new(Duration::from_secs(5), None, now);
        plan.finish_replay();

        plan.on_failure(now);
        plan.on_failure(now + Duration::from_secs(3));
        assert!(!plan.rewind_if_due(now + Duration::from_secs(4)));
        assert_eq!(plan.cursor(), ">");

        assert!(plan.rewind_if_due(now + Duration::from_secs(5)));
        assert_eq!(plan.cursor(), "0");
        assert!(!plan.rewind_if_due(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_read_plan_failure_during_replay_waits_for_live_mode() {
        let now = Instant::now();
        let mut plan = ReadPlan::new(Duration::from_secs(1), None, now);
        plan.on_failure(now);
        plan.advance(Some("5-0"));

        // 重放过程中不回卷，游标继续越过失败条目
        assert!(!plan.rewind_if_due(now + Duration::from_secs(2)));
        assert_eq!(plan.cursor(), "5-0");

        plan.finish_replay();
        assert!(plan.rewind_if_due(now + Duration::from_secs(2)));
        assert_eq!(plan.cursor(), "0");
    }

    #[test]
    fn test_read_plan_claims_on_idle_interval() {
        let now = Instant::now();
        let mut plan = ReadPlan::new(Duration::from_secs(5), Some(Duration::from_secs(60)), now);
        assert_eq!(plan.claim_due(now + Duration::from_secs(30)), None);
        assert_eq!(
            plan.claim_due(now + Duration::from_secs(60)),
            Some(Duration::from_secs(60))
        );
        assert_eq!(plan.claim_due(now + Duration::from_secs(90)), None);

        let mut disabled = ReadPlan::new(Duration::from_secs(5), None, now);
        assert_eq!(disabled.claim_due(now + Duration::from_secs(3600)), None);
    }

    struct Collect(Arc<SyncMutex<Vec<BusEvent>>>);

    #[async_trait]
    impl EventHandler for Collect {
        async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
            self.0.lock().push(event.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "collect"
        }
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_publish_and_consume_round_trip() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let redis = RedisClient::new(&url).await.unwrap();
        let topic = format!("oppstream.test.{}", rand::random::<u32>());
        let settings = BrokerSettings {
            consumer_name: Some("test-consumer".to_string()),
            poll_interval_ms: 50,
            ..BrokerSettings::default()
        };

        let bus = RedisStreamBus::new(redis, settings);
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        bus.subscribe(&topic, Arc::new(Collect(seen.clone()))).await;
        bus.start().await.unwrap();

        assert!(bus.publish(&topic, "https://a.io", Bytes::from_static(b"hello")).await);

        for _ in 0..100 {
            if !seen.lock().is_empty() {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
        bus.stop().await;

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].key, "https://a.io");
        assert_eq!(seen[0].payload, Bytes::from_static(b"hello"));
    }

    struct FailOnce {
        failed: std::sync::atomic::AtomicBool,
        seen: Arc<SyncMutex<Vec<BusEvent>>>,
    }

    #[async_trait]
    impl EventHandler for FailOnce {
        async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("sink offline");
            }
            self.seen.lock().push(event.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "fail-once"
        }
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_failed_entry_is_redelivered_while_running() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let redis = RedisClient::new(&url).await.unwrap();
        let topic = format!("oppstream.test.{}", rand::random::<u32>());
        let settings = BrokerSettings {
            consumer_name: Some("test-consumer".to_string()),
            poll_interval_ms: 20,
            redelivery_delay_ms: 100,
            ..BrokerSettings::default()
        };

        let bus = RedisStreamBus::new(redis, settings);
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        bus.subscribe(
            &topic,
            Arc::new(FailOnce {
                failed: std::sync::atomic::AtomicBool::new(false),
                seen: seen.clone(),
            }),
        )
        .await;
        bus.start().await.unwrap();

        assert!(bus.publish(&topic, "https://a.io", Bytes::from_static(b"hello")).await);

        for _ in 0..100 {
            if !seen.lock().is_empty() {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
        bus.stop().await;

        assert_eq!(seen.lock().len(), 1);
    }
}
