// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::queue::event_bus::{BusError, BusEvent, EventBus, EventHandler, HandlerRegistry};
use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 进程内事件总线
///
/// 有界 FIFO 队列，由单个分发循环消费。每个事件的全部处理器并发执行，
/// 分发循环等待它们全部结束后才取下一个事件，慢处理器会拖慢整个队列。
pub struct InMemoryEventBus {
    sender: mpsc::Sender<BusEvent>,
    receiver: Arc<Mutex<mpsc::Receiver<BusEvent>>>,
    registry: HandlerRegistry,
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    publish_timeout: Duration,
}

impl InMemoryEventBus {
    /// 创建进程内总线
    ///
    /// # 参数
    ///
    /// * `capacity` - 队列容量
    /// * `publish_timeout` - 队列满时发布的最长等待时间
    pub fn new(capacity: usize, publish_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            registry: HandlerRegistry::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown,
            dispatcher: Mutex::new(None),
            publish_timeout,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> bool {
        if !self.is_running() {
            warn!(topic, key, "In-memory bus not running, publish refused");
            counter!("bus_publish_total", "mode" => "memory", "result" => "not_running")
                .increment(1);
            return false;
        }

        let event = BusEvent::new(topic, key, payload);
        match self.sender.send_timeout(event, self.publish_timeout).await {
            Ok(()) => {
                counter!("bus_publish_total", "mode" => "memory", "result" => "ok").increment(1);
                true
            }
            Err(e) => {
                warn!(topic, key, error = %e, "In-memory bus buffer exhausted");
                counter!("bus_publish_total", "mode" => "memory", "result" => "full")
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
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_some() {
            return Ok(());
        }

        self.shutdown.send_replace(false);
        let mut shutdown = self.shutdown.subscribe();
        let receiver = self.receiver.clone();
        let registry = self.registry.clone();
        self.running.store(true, Ordering::SeqCst);

        *dispatcher = Some(tokio::spawn(async move {
            let mut receiver = receiver.lock().await;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.changed() => None,
                    event = receiver.recv() => event,
                };
                match next {
                    Some(event) => {
                        registry.dispatch(&event).await;
                    }
                    None => break,
                }
            }

            // 已被接受的事件发布方不会再走兜底，退出前全部处理完
            let mut drained = 0usize;
            while let Ok(event) = receiver.try_recv() {
                registry.dispatch(&event).await;
                drained += 1;
            }
            info!(drained, "In-memory bus dispatcher stopped");
        }));

        info!("In-memory bus dispatcher started");
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "In-memory bus dispatcher ended abnormally");
            }
        }
    }

    fn mode(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{sleep, Instant};

    struct Recorder {
        name: String,
        seen: Arc<SyncMutex<Vec<(String, Instant)>>>,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
            sleep(self.delay).await;
            self.seen.lock().push((event.key.clone(), Instant::now()));
            if self.fail {
                anyhow::bail!("{} failed on {}", self.name, event.key);
            }
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct Panicker;

    #[async_trait]
    impl EventHandler for Panicker {
        async fn handle(&self, _event: &BusEvent) -> anyhow::Result<()> {
            panic!("boom");
        }

        fn name(&self) -> &str {
            "panicker"
        }
    }

    fn recorder(
        name: &str,
        delay: Duration,
        fail: bool,
    ) -> (Arc<Recorder>, Arc<SyncMutex<Vec<(String, Instant)>>>) {
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        (
            Arc::new(Recorder {
                name: name.to_string(),
                seen: seen.clone(),
                delay,
                fail,
            }),
            seen,
        )
    }

    #[tokio::test]
    async fn test_publish_refused_when_not_running() {
        let bus = InMemoryEventBus::new(8, Duration::from_millis(10));
        assert!(!bus.publish("raw", "k", Bytes::from_static(b"x")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_with_wait_for_all_handlers() {
        let bus = InMemoryEventBus::new(8, Duration::from_millis(10));
        let (fast, fast_seen) = recorder("fast", Duration::from_millis(10), false);
        let (slow, slow_seen) = recorder("slow", Duration::from_secs(1), false);
        bus.subscribe("raw", fast).await;
        bus.subscribe("raw", slow).await;
        bus.start().await.unwrap();

        for key in ["a", "b", "c"] {
            assert!(bus.publish("raw", key, Bytes::from_static(b"{}")).await);
        }
        sleep(Duration::from_secs(5)).await;
        bus.stop().await;

        let fast_seen = fast_seen.lock().clone();
        let slow_seen = slow_seen.lock().clone();
        let order: Vec<_> = fast_seen.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        // 下一个事件必须等上一个事件的慢处理器结束后才开始
        for i in 1..3 {
            assert!(fast_seen[i].1 >= slow_seen[i - 1].1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_failure_and_panic_do_not_stop_dispatcher() {
        let bus = InMemoryEventBus::new(8, Duration::from_millis(10));
        let (failing, _) = recorder("failing", Duration::ZERO, true);
        let (ok, ok_seen) = recorder("ok", Duration::ZERO, false);
        bus.subscribe("raw", failing).await;
        bus.subscribe("raw", Arc::new(Panicker)).await;
        bus.subscribe("raw", ok).await;
        bus.start().await.unwrap();

        assert!(bus.publish("raw", "first", Bytes::new()).await);
        assert!(bus.publish("raw", "second", Bytes::new()).await);
        sleep(Duration::from_secs(1)).await;
        bus.stop().await;

        assert_eq!(ok_seen.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_fails_publish() {
        struct Blocker(Arc<AtomicUsize>);

        #[async_trait]
        impl EventHandler for Blocker {
            async fn handle(&self, _event: &BusEvent) -> anyhow::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_secs(3600)).await;
                Ok(())
            }

            fn name(&self) -> &str {
                "blocker"
            }
        }

        let bus = InMemoryEventBus::new(1, Duration::from_millis(50));
        let started = Arc::new(AtomicUsize::new(0));
        bus.subscribe("raw", Arc::new(Blocker(started.clone()))).await;
        bus.start().await.unwrap();

        assert!(bus.publish("raw", "1", Bytes::new()).await);
        while started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        // 分发循环被阻塞，第二条占满缓冲区，第三条超时失败
        assert!(bus.publish("raw", "2", Bytes::new()).await);
        assert!(!bus.publish("raw", "3", Bytes::new()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drains_accepted_events() {
        let bus = InMemoryEventBus::new(8, Duration::from_millis(10));
        let (slow, seen) = recorder("slow", Duration::from_millis(100), false);
        bus.subscribe("raw", slow).await;
        bus.start().await.unwrap();

        for key in ["a", "b", "c", "d", "e"] {
            assert!(bus.publish("raw", key, Bytes::new()).await);
        }
        bus.stop().await;

        let order: Vec<_> = seen.lock().iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d", "e"]);
        assert!(!bus.publish("raw", "late", Bytes::new()).await);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let bus = InMemoryEventBus::new(8, Duration::from_millis(10));
        let (ok, ok_seen) = recorder("ok", Duration::ZERO, false);
        bus.subscribe("raw", ok).await;

        bus.start().await.unwrap();
        bus.stop().await;
        assert!(!bus.publish("raw", "refused", Bytes::new()).await);

        bus.start().await.unwrap();
        assert!(bus.publish("raw", "accepted", Bytes::new()).await);
        while ok_seen.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        bus.stop().await;
        assert_eq!(ok_seen.lock()[0].0, "accepted");
    }
}
