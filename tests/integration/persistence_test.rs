// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::opportunity;
use migration::{Migrator, MigratorTrait};
use oppstream::config::settings::DedupSettings;
use oppstream::domain::repositories::record_repository::RecordRepository;
use oppstream::domain::services::dedup_service::{Decision, DedupEngine};
use oppstream::infrastructure::repositories::record_repo_impl::RecordRepositoryImpl;
use sea_orm::Database;
use std::sync::Arc;

#[tokio::test]
async fn test_restarted_engine_remembers_persisted_records() {
    let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
    Migrator::up(db.as_ref(), None).await.unwrap();
    let repo: Arc<dyn RecordRepository> = Arc::new(RecordRepositoryImpl::new(db));

    let known = opportunity("ETHGlobal Bangkok", "ETHGlobal", "https://ethglobal.com/events/bangkok");
    repo.save(&known.identifier(), &known).await.unwrap();

    // 模拟重启：新引擎从存储预热
    let engine = DedupEngine::new(&DedupSettings::default(), Some(repo.clone()));

    let mut first_sighting = known.clone();
    assert_eq!(engine.process(&mut first_sighting).await, Decision::Duplicate);

    let mut same_again = known.clone();
    assert_eq!(engine.process(&mut same_again).await, Decision::Duplicate);

    let mut extended = known.clone();
    extended.deadline = Some("2099-12-01".to_string());
    assert_eq!(engine.process(&mut extended).await, Decision::Update);
    assert!(extended.is_update);

    let mut fresh = opportunity("Base Onchain Summer", "Coinbase", "https://base.org/summer");
    assert_eq!(engine.process(&mut fresh).await, Decision::Accepted);

    let stats = engine.stats().await;
    assert_eq!(stats.seen_registry_size, 2);
    assert_eq!(stats.duplicates_dropped, 2);
}
