// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{opportunity, DownBus, FakeSite, ScriptedExtractor, SiteFactory};
use migration::{Migrator, MigratorTrait};
use oppstream::config::settings::{
    BrokerSettings, CrawlerSettings, DedupSettings, ExtractionSettings, MissionSettings,
    RateLimiterSettings,
};
use oppstream::domain::models::crawl::CrawlTarget;
use oppstream::domain::repositories::record_repository::RecordRepository;
use oppstream::domain::services::crawl_service::CrawlOrchestrator;
use oppstream::domain::services::dedup_service::DedupEngine;
use oppstream::domain::services::mission_service::MissionTracker;
use oppstream::domain::services::rate_limiting_service::AdaptiveRateLimiter;
use oppstream::infrastructure::repositories::record_repo_impl::RecordRepositoryImpl;
use oppstream::queue::event_bus::EventBus;
use oppstream::queue::fallback::FallbackPublisher;
use oppstream::utils::errors::WorkerError;
use oppstream::workers::dedup_worker::{DedupStage, VerifiedSink};
use oppstream::workers::extraction_worker::ExtractionStage;
use oppstream::workers::manager::WorkerManager;
use sea_orm::Database;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_every_page_reaches_storage_with_broker_down() {
    let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
    Migrator::up(db.as_ref(), None).await.unwrap();
    let repo: Arc<dyn RecordRepository> = Arc::new(RecordRepositoryImpl::new(db));

    let broker = BrokerSettings::default();
    let bus: Arc<dyn EventBus> = Arc::new(DownBus);
    let publisher = FallbackPublisher::new(bus.clone());

    let urls: Vec<String> = (0..7)
        .map(|i| format!("https://grants.example/round/{}", i))
        .collect();
    let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    let site = FakeSite::with_pages(&url_refs);
    let extractor = Arc::new(ScriptedExtractor::new(
        urls.iter()
            .enumerate()
            .map(|(i, url)| {
                (
                    url.as_str(),
                    vec![opportunity(&format!("Grant Round {}", i), "Grants DAO", url)],
                )
            })
            .collect(),
    ));

    let dedup_stage = Arc::new(DedupStage::new(
        Arc::new(DedupEngine::new(&DedupSettings::default(), Some(repo.clone()))),
        Arc::new(VerifiedSink::new(
            Some(repo.clone()),
            bus.clone(),
            broker.verified_topic.clone(),
        )),
    ));
    let extraction_stage = Arc::new(ExtractionStage::new(
        extractor,
        Arc::new(AdaptiveRateLimiter::new(RateLimiterSettings::default())),
        publisher.clone(),
        dedup_stage,
        Arc::new(MissionTracker::new(None, &MissionSettings::default())),
        broker.extracted_topic.clone(),
        &ExtractionSettings::default(),
    ));

    // 代理不可用时管理器拒绝启动，但编排器照常工作
    let mut manager = WorkerManager::new(bus.clone());
    assert!(matches!(
        manager.start().await,
        Err(WorkerError::BusError(_))
    ));

    let orchestrator = CrawlOrchestrator::new(
        CrawlerSettings::default(),
        broker.raw_topic.clone(),
        Arc::new(SiteFactory(site.clone())),
        publisher,
        extraction_stage,
    );
    let targets = urls.iter().map(|u| CrawlTarget::new(u.as_str(), "grants")).collect();
    let report = orchestrator.crawl(targets).await;

    assert_eq!(report.batches, 2);
    assert_eq!(report.fallback, 7);
    assert_eq!(report.published, 0);
    assert_eq!(report.failed, 0);
    assert!(site.sessions_balanced());

    let mut stored = repo.load_all_identifiers().await.unwrap();
    stored.sort();
    let mut expected: Vec<_> = (0..7)
        .map(|i| opportunity(&format!("Grant Round {}", i), "Grants DAO", &urls[i]).identifier())
        .collect();
    expected.sort();
    assert_eq!(stored, expected);
}
