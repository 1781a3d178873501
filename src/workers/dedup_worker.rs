// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::record::{ExtractedRecord, Identifier};
use crate::domain::repositories::record_repository::RecordRepository;
use crate::domain::services::dedup_service::{Decision, DedupEngine};
use crate::queue::event_bus::{BusEvent, EventBus, EventHandler};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// 去重后记录的去向
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// 接收一条判定为新记录或更新的记录
    async fn accept(&self, identifier: &Identifier, record: &ExtractedRecord)
        -> anyhow::Result<()>;
}

/// 默认去向：持久化后发布到已验证主题
///
/// 持久化是可选的；发布失败时记录已落库则只告警
pub struct VerifiedSink {
    repository: Option<Arc<dyn RecordRepository>>,
    bus: Arc<dyn EventBus>,
    verified_topic: String,
}

impl VerifiedSink {
    /// 创建默认去向
    ///
    /// # 参数
    ///
    /// * `repository` - 记录仓库，`None` 时不落库
    /// * `bus` - 事件总线
    /// * `verified_topic` - 已验证记录主题
    pub fn new(
        repository: Option<Arc<dyn RecordRepository>>,
        bus: Arc<dyn EventBus>,
        verified_topic: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            bus,
            verified_topic: verified_topic.into(),
        }
    }
}

#[async_trait]
impl RecordSink for VerifiedSink {
    async fn accept(
        &self,
        identifier: &Identifier,
        record: &ExtractedRecord,
    ) -> anyhow::Result<()> {
        if let Some(repository) = &self.repository {
            repository.save(identifier, record).await?;
        }

        let payload = Bytes::from(serde_json::to_vec(record)?);
        if !self
            .bus
            .publish(&self.verified_topic, identifier.as_str(), payload)
            .await
        {
            if self.repository.is_some() {
                warn!(identifier = %identifier, "Verified record persisted but not published");
            } else {
                error!(
                    identifier = %identifier,
                    title = %record.title,
                    source_url = %record.source_url,
                    "Verified record could not be published and no store is configured"
                );
            }
        }
        Ok(())
    }
}

/// 去重阶段
///
/// 订阅抽取主题，只把新记录和携带新信息的更新交给去向
pub struct DedupStage {
    engine: Arc<DedupEngine>,
    sink: Arc<dyn RecordSink>,
}

impl DedupStage {
    pub fn new(engine: Arc<DedupEngine>, sink: Arc<dyn RecordSink>) -> Self {
        Self { engine, sink }
    }
}

#[async_trait]
impl EventHandler for DedupStage {
    #[instrument(skip(self, event), fields(topic = %event.topic, key = %event.key))]
    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
        let mut record: ExtractedRecord = match serde_json::from_slice(&event.payload) {
            Ok(record) => record,
            Err(e) => {
                error!(key = %event.key, error = %e, "Dropping malformed extracted record");
                return Ok(());
            }
        };

        // 去向失败时引擎不登记该记录，总线重投后仍会下发
        let sink = self.sink.clone();
        let decision = self
            .engine
            .process_with(&mut record, |verified| async move {
                sink.accept(&verified.identifier(), &verified).await
            })
            .await?;
        match &decision {
            Decision::Accepted | Decision::Update => {
                info!(
                    identifier = %record.identifier(),
                    title = %record.title,
                    decision = decision.label(),
                    "Record verified"
                );
            }
            Decision::Duplicate => {
                debug!(title = %record.title, "Duplicate record dropped");
            }
            Decision::Rejected(reason) => {
                warn!(title = %record.title, reason = %reason, "Record rejected by dedup stage");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "dedup"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::DedupSettings;
    use crate::domain::models::record::Provenance;
    use crate::utils::errors::RepositoryError;
    use crate::queue::event_bus::BusError;
    use mockall::mock;
    use parking_lot::Mutex;

    mock! {
        pub Sink {}

        #[async_trait]
        impl RecordSink for Sink {
            async fn accept(&self, identifier: &Identifier, record: &ExtractedRecord) -> anyhow::Result<()>;
        }
    }

    mock! {
        pub Repo {}

        #[async_trait]
        impl RecordRepository for Repo {
            async fn save(&self, identifier: &Identifier, record: &ExtractedRecord) -> Result<(), RepositoryError>;
            async fn load_all_identifiers(&self) -> Result<Vec<Identifier>, RepositoryError>;
        }
    }

    struct CaptureBus {
        up: bool,
        published: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventBus for CaptureBus {
        async fn publish(&self, topic: &str, key: &str, _payload: Bytes) -> bool {
            if self.up {
                self.published.lock().push(format!("{}:{}", topic, key));
            }
            self.up
        }
        async fn subscribe(&self, _topic: &str, _handler: Arc<dyn EventHandler>) {}
        async fn start(&self) -> Result<(), BusError> {
            Ok(())
        }
        async fn stop(&self) {}
        fn mode(&self) -> &'static str {
            "capture"
        }
    }

    fn record(deadline: Option<&str>) -> ExtractedRecord {
        ExtractedRecord {
            title: "Gitcoin Grants Round".to_string(),
            organization: "Gitcoin".to_string(),
            amount: None,
            amount_display: None,
            deadline: deadline.map(str::to_string),
            geo_tags: vec!["Global".to_string()],
            type_tags: vec!["Grant".to_string()],
            description: String::new(),
            source_url: "https://gitcoin.co/grants".to_string(),
            provenance: Provenance::Refinery,
            is_update: false,
            mission_id: None,
        }
    }

    fn event(record: &ExtractedRecord) -> BusEvent {
        BusEvent::new(
            "extracted_opportunities",
            record.identifier().to_string(),
            Bytes::from(serde_json::to_vec(record).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_forwards_new_and_updated_records_only() {
        let mut sink = MockSink::new();
        sink.expect_accept()
            .times(2)
            .returning(|_, _| Ok(()));

        let engine = Arc::new(DedupEngine::new(&DedupSettings::default(), None));
        let stage = DedupStage::new(engine.clone(), Arc::new(sink));

        stage.handle(&event(&record(None))).await.unwrap();
        stage.handle(&event(&record(None))).await.unwrap();
        stage.handle(&event(&record(Some("2030-05-01")))).await.unwrap();

        let stats = engine.stats().await;
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.updates, 1);
        assert_eq!(stats.duplicates_dropped, 1);
    }

    #[tokio::test]
    async fn test_sink_failure_surfaces_to_bus() {
        let mut sink = MockSink::new();
        sink.expect_accept()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("database is locked")));

        let engine = Arc::new(DedupEngine::new(&DedupSettings::default(), None));
        let stage = DedupStage::new(engine, Arc::new(sink));
        assert!(stage.handle(&event(&record(None))).await.is_err());
    }

    #[tokio::test]
    async fn test_redelivery_after_sink_failure_reaches_sink() {
        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        let mut sink = MockSink::new();
        sink.expect_accept().times(2).returning(move |_, _| {
            let mut calls = counter.lock();
            *calls += 1;
            if *calls == 1 {
                Err(anyhow::anyhow!("database is locked"))
            } else {
                Ok(())
            }
        });

        let engine = Arc::new(DedupEngine::new(&DedupSettings::default(), None));
        let stage = DedupStage::new(engine.clone(), Arc::new(sink));
        let delivered = event(&record(None));

        assert!(stage.handle(&delivered).await.is_err());
        assert_eq!(engine.stats().await.seen_registry_size, 0);

        stage.handle(&delivered).await.unwrap();
        assert_eq!(*calls.lock(), 2);

        let stats = engine.stats().await;
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.duplicates_dropped, 0);
        assert_eq!(stats.seen_registry_size, 1);
    }

    #[tokio::test]
    async fn test_failed_update_is_offered_again() {
        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        let mut sink = MockSink::new();
        sink.expect_accept().times(3).returning(move |_, record| {
            let mut calls = counter.lock();
            *calls += 1;
            if *calls == 2 {
                assert!(record.is_update);
                Err(anyhow::anyhow!("connection reset"))
            } else {
                Ok(())
            }
        });

        let engine = Arc::new(DedupEngine::new(&DedupSettings::default(), None));
        let stage = DedupStage::new(engine.clone(), Arc::new(sink));

        stage.handle(&event(&record(None))).await.unwrap();
        let extended = event(&record(Some("2030-05-01")));
        assert!(stage.handle(&extended).await.is_err());
        stage.handle(&extended).await.unwrap();

        let stats = engine.stats().await;
        assert_eq!(stats.updates, 1);
        assert_eq!(stats.duplicates_dropped, 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let mut sink = MockSink::new();
        sink.expect_accept().never();
        let engine = Arc::new(DedupEngine::new(&DedupSettings::default(), None));
        let stage = DedupStage::new(engine.clone(), Arc::new(sink));

        let bad = BusEvent::new("extracted_opportunities", "k", Bytes::from_static(b"{"));
        stage.handle(&bad).await.unwrap();
        assert_eq!(engine.stats().await.total_processed, 0);
    }

    #[tokio::test]
    async fn test_verified_sink_saves_then_publishes() {
        let mut repo = MockRepo::new();
        repo.expect_save().times(1).returning(|_, _| Ok(()));
        let bus = Arc::new(CaptureBus {
            up: true,
            published: Mutex::new(Vec::new()),
        });
        let sink = VerifiedSink::new(Some(Arc::new(repo)), bus.clone(), "verified_opportunities");

        let r = record(None);
        let id = r.identifier();
        sink.accept(&id, &r).await.unwrap();

        assert_eq!(
            bus.published.lock().clone(),
            vec![format!("verified_opportunities:{}", id)]
        );
    }

    #[tokio::test]
    async fn test_verified_sink_tolerates_broker_outage() {
        let bus = Arc::new(CaptureBus {
            up: false,
            published: Mutex::new(Vec::new()),
        });
        let sink = VerifiedSink::new(None, bus, "verified_opportunities");
        let r = record(None);
        assert!(sink.accept(&r.identifier(), &r).await.is_ok());
    }
}
