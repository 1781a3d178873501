// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{opportunity, wait_until, Collector, FakeSite, ScriptedExtractor, SiteFactory};
use oppstream::config::settings::{
    BrokerSettings, CrawlerSettings, DedupSettings, ExtractionSettings, MissionSettings,
    RateLimiterSettings,
};
use oppstream::domain::models::crawl::CrawlTarget;
use oppstream::domain::models::mission::MissionStatus;
use oppstream::domain::services::crawl_service::CrawlOrchestrator;
use oppstream::domain::services::dedup_service::DedupEngine;
use oppstream::domain::services::mission_service::MissionTracker;
use oppstream::domain::services::rate_limiting_service::AdaptiveRateLimiter;
use oppstream::infrastructure::repositories::mission_store_impl::InMemoryMissionStore;
use oppstream::queue::event_bus::EventBus;
use oppstream::queue::fallback::FallbackPublisher;
use oppstream::queue::memory_bus::InMemoryEventBus;
use oppstream::workers::dedup_worker::{DedupStage, VerifiedSink};
use oppstream::workers::extraction_worker::ExtractionStage;
use oppstream::workers::manager::WorkerManager;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const DEVPOST: &str = "https://devpost.com/hackathons";
const SUPERTEAM: &str = "https://superteam.fun/earn";
const TAIKAI: &str = "https://taikai.network/hackathons";

#[tokio::test(start_paused = true)]
async fn test_pages_flow_through_extraction_and_dedup_to_verified_topic() {
    let broker = BrokerSettings::default();
    let bus = Arc::new(InMemoryEventBus::new(64, Duration::from_secs(1)));
    let publisher = FallbackPublisher::new(bus.clone());

    let store = Arc::new(InMemoryMissionStore::new(Duration::from_secs(3600)));
    let tracker = Arc::new(MissionTracker::new(Some(store), &MissionSettings::default()));

    // 同一个悬赏出现在两个页面上，只应验证一次
    let shared = opportunity("Solana Mobile Bounty", "Superteam", "https://superteam.fun/earn/mobile");
    let extractor = Arc::new(ScriptedExtractor::new(vec![
        (
            DEVPOST,
            vec![
                opportunity("AI Agents Hackathon", "Devpost", "https://devpost.com/ai-agents"),
                shared.clone(),
            ],
        ),
        (SUPERTEAM, vec![shared.clone()]),
        (
            TAIKAI,
            vec![opportunity("Web3 Grant Round", "Taikai", "https://taikai.network/grants/w3")],
        ),
    ]));

    let dedup_engine = Arc::new(DedupEngine::new(&DedupSettings::default(), None));
    let dedup_stage = Arc::new(DedupStage::new(
        dedup_engine.clone(),
        Arc::new(VerifiedSink::new(None, bus.clone(), broker.verified_topic.clone())),
    ));
    let extraction_stage = Arc::new(ExtractionStage::new(
        extractor.clone(),
        Arc::new(AdaptiveRateLimiter::new(RateLimiterSettings::default())),
        publisher.clone(),
        dedup_stage.clone(),
        tracker.clone(),
        broker.extracted_topic.clone(),
        &ExtractionSettings::default(),
    ));
    let verified = Arc::new(Collector::default());

    let mut manager = WorkerManager::new(bus.clone());
    manager.subscribe(&broker.raw_topic, extraction_stage.clone()).await;
    manager.subscribe(&broker.extracted_topic, dedup_stage).await;
    manager.subscribe(&broker.verified_topic, verified.clone()).await;
    manager.start().await.unwrap();

    let site = FakeSite::with_pages(&[DEVPOST, SUPERTEAM, TAIKAI]);
    let orchestrator = CrawlOrchestrator::new(
        CrawlerSettings::default(),
        broker.raw_topic.clone(),
        Arc::new(SiteFactory(site.clone())),
        publisher,
        extraction_stage,
    );

    tracker
        .announce("patrol_p1p2p3", "devpost, superteam, taikai", MissionStatus::Active)
        .await;
    let targets = [DEVPOST, SUPERTEAM, TAIKAI]
        .iter()
        .map(|url| CrawlTarget::new(*url, "patrol").with_mission("patrol_p1p2p3"))
        .collect();
    let report = orchestrator.crawl(targets).await;
    assert_eq!(report.published, 3);
    assert_eq!(report.fallback, 0);
    assert!(site.sessions_balanced());

    assert!(wait_until(|| verified.events.lock().len() >= 3, Duration::from_secs(30)).await);
    // 多等一会儿，确认重复记录没有漏到已验证主题
    tokio::time::sleep(Duration::from_secs(1)).await;

    let records = verified.records();
    assert_eq!(records.len(), 3);
    assert!(records
        .iter()
        .all(|r| r.mission_id.as_deref() == Some("patrol_p1p2p3")));
    assert!(records.iter().all(|r| r.geo_tags.contains(&"Global".to_string())));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);

    let stats = dedup_engine.stats().await;
    assert_eq!(stats.accepted, 3);
    assert_eq!(stats.duplicates_dropped, 1);

    manager.shutdown().await;
    assert!(!bus.publish(&broker.raw_topic, "k", bytes::Bytes::new()).await);
}
