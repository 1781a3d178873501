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

use oppstream::config::settings::{BrokerMode, Settings};
use oppstream::domain::repositories::mission_store::MissionStore;
use oppstream::domain::repositories::record_repository::RecordRepository;
use oppstream::domain::services::crawl_service::CrawlOrchestrator;
use oppstream::domain::services::dedup_service::DedupEngine;
use oppstream::domain::services::llm_service::LlmExtractor;
use oppstream::domain::services::mission_service::MissionTracker;
use oppstream::domain::services::rate_limiting_service::AdaptiveRateLimiter;
use oppstream::engines::chromium_engine::ChromiumSessionFactory;
use oppstream::infrastructure::cache::redis_client::RedisClient;
use oppstream::infrastructure::database::connection;
use oppstream::infrastructure::repositories::mission_store_impl::{
    InMemoryMissionStore, RedisMissionStore,
};
use oppstream::infrastructure::repositories::record_repo_impl::RecordRepositoryImpl;
use oppstream::queue::event_bus::EventBus;
use oppstream::queue::fallback::FallbackPublisher;
use oppstream::queue::memory_bus::InMemoryEventBus;
use oppstream::queue::redis_stream_bus::RedisStreamBus;
use oppstream::utils::telemetry;
use oppstream::workers::dedup_worker::{DedupStage, VerifiedSink};
use oppstream::workers::extraction_worker::ExtractionStage;
use oppstream::workers::manager::WorkerManager;
use oppstream::workers::patrol_worker::PatrolWorker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 主函数
///
/// 组装流水线：总线、存储、各处理阶段和巡逻工作器，然后等待关闭信号
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting oppstream...");

    // 2. Load configuration
    let settings = Settings::new()?;
    info!("Configuration loaded");

    oppstream::infrastructure::metrics::init_metrics(&settings.metrics);

    // 3. Optional Redis client shared by the broker and mission store
    let redis_client = match &settings.redis {
        Some(redis) => Some(RedisClient::new(&redis.url).await?),
        None => None,
    };

    // 4. Optional database for verified records
    let record_repo: Option<Arc<dyn RecordRepository>> = match &settings.database {
        Some(database) => {
            let db = Arc::new(connection::connect(database).await?);
            Some(Arc::new(RecordRepositoryImpl::new(db)))
        }
        None => {
            warn!("No database configured, verified records are not persisted");
            None
        }
    };

    // 5. Event bus
    let bus: Arc<dyn EventBus> = match (&settings.broker.mode, &redis_client) {
        (BrokerMode::Redis, Some(client)) => {
            Arc::new(RedisStreamBus::new(client.clone(), settings.broker.clone()))
        }
        (BrokerMode::Redis, None) => {
            warn!("Redis broker requested without redis settings, using in-memory bus");
            in_memory_bus(&settings)
        }
        (BrokerMode::Memory, _) => in_memory_bus(&settings),
    };
    let publisher = FallbackPublisher::new(bus.clone());

    // 6. Mission tracking
    let mission_store: Arc<dyn MissionStore> = match &redis_client {
        Some(client) => Arc::new(RedisMissionStore::new(
            client.clone(),
            settings.missions.key.clone(),
            settings.missions.ttl_secs,
        )),
        None => Arc::new(InMemoryMissionStore::new(Duration::from_secs(
            settings.missions.ttl_secs,
        ))),
    };
    let tracker = Arc::new(MissionTracker::new(Some(mission_store), &settings.missions));

    // 7. Pipeline stages
    let dedup_stage = Arc::new(DedupStage::new(
        Arc::new(DedupEngine::new(&settings.dedup, record_repo.clone())),
        Arc::new(VerifiedSink::new(
            record_repo,
            bus.clone(),
            settings.broker.verified_topic.clone(),
        )),
    ));
    let extraction_stage = Arc::new(ExtractionStage::new(
        Arc::new(LlmExtractor::new(&settings.extraction)?),
        Arc::new(AdaptiveRateLimiter::new(settings.rate_limiter.clone())),
        publisher.clone(),
        dedup_stage.clone(),
        tracker.clone(),
        settings.broker.extracted_topic.clone(),
        &settings.extraction,
    ));

    let mut manager = WorkerManager::new(bus.clone());
    manager
        .subscribe(&settings.broker.raw_topic, extraction_stage.clone())
        .await;
    manager
        .subscribe(&settings.broker.extracted_topic, dedup_stage)
        .await;

    // 8. Crawl orchestrator and patrol
    if settings.patrol.enabled {
        let factory = Arc::new(ChromiumSessionFactory::launch(&settings.crawler).await?);
        let orchestrator = Arc::new(CrawlOrchestrator::new(
            settings.crawler.clone(),
            settings.broker.raw_topic.clone(),
            factory,
            publisher,
            extraction_stage,
        ));
        manager.add_worker(Arc::new(PatrolWorker::new(
            orchestrator,
            tracker,
            &settings.patrol,
        )));
    } else {
        info!("Patrol disabled, only consuming published pages");
    }

    manager.start().await?;
    info!("Pipeline running");

    manager.wait_for_shutdown().await;
    Ok(())
}

fn in_memory_bus(settings: &Settings) -> Arc<dyn EventBus> {
    Arc::new(InMemoryEventBus::new(
        settings.broker.queue_capacity,
        Duration::from_millis(settings.broker.publish_timeout_ms),
    ))
}
