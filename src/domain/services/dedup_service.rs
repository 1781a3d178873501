// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::DedupSettings;
use crate::domain::models::crawl::RejectReason;
use crate::domain::models::record::{ExtractedRecord, Identifier, Provenance};
use crate::domain::repositories::record_repository::RecordRepository;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::future::{self, Future};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use validator::Validate;

/// 去重判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// 新记录
    Accepted,
    /// 已知记录但携带新信息
    Update,
    /// 无新信息，丢弃
    Duplicate,
    /// 记录本身不合法
    Rejected(RejectReason),
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Accepted => "accepted",
            Decision::Update => "update",
            Decision::Duplicate => "duplicate",
            Decision::Rejected(_) => "rejected",
        }
    }

    /// 是否需要继续交给下游
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Decision::Accepted | Decision::Update)
    }
}

/// 去重统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupStats {
    pub total_processed: u64,
    pub accepted: u64,
    pub updates: u64,
    pub duplicates_dropped: u64,
    pub rejected: u64,
    /// 观测窗口内的记录数
    pub unique_in_window: usize,
    /// 已见标识数
    pub seen_registry_size: usize,
}

impl DedupStats {
    /// 重复率（百分比）
    pub fn dedup_rate(&self) -> f64 {
        if self.total_processed == 0 {
            return 0.0;
        }
        self.duplicates_dropped as f64 / self.total_processed as f64 * 100.0
    }
}

/// 已见记录的上次取值
#[derive(Debug, Clone)]
struct Snapshot {
    amount: Option<f64>,
    amount_display: Option<String>,
    deadline: Option<String>,
    provenance: Provenance,
}

impl Snapshot {
    fn of(record: &ExtractedRecord) -> Self {
        Self {
            amount: record.amount,
            amount_display: clean(&record.amount_display),
            deadline: clean(&record.deadline),
            provenance: record.provenance,
        }
    }

    /// 字段“存在且与上次不同”，或来源保真度更高
    fn has_new_signal(&self, record: &ExtractedRecord) -> bool {
        changed(&self.amount, &record.amount)
            || changed(&self.amount_display, &clean(&record.amount_display))
            || changed(&self.deadline, &clean(&record.deadline))
            || record.provenance > self.provenance
    }

    /// 合并新取值，缺失字段保留旧值
    fn merge(&mut self, record: &ExtractedRecord) {
        if record.amount.is_some() {
            self.amount = record.amount;
        }
        if let Some(display) = clean(&record.amount_display) {
            self.amount_display = Some(display);
        }
        if let Some(deadline) = clean(&record.deadline) {
            self.deadline = Some(deadline);
        }
        self.provenance = self.provenance.max(record.provenance);
    }
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn changed<T: PartialEq>(previous: &Option<T>, current: &Option<T>) -> bool {
    match current {
        Some(value) => previous.as_ref() != Some(value),
        None => false,
    }
}

#[derive(Debug)]
struct SeenEntry {
    last_seen: DateTime<Utc>,
    /// 从持久化快照预热的条目没有上次取值
    snapshot: Option<Snapshot>,
}

#[derive(Debug, Default)]
struct DedupState {
    seen: HashMap<Identifier, SeenEntry>,
    fingerprints: HashMap<String, Identifier>,
    window: VecDeque<(Instant, Identifier)>,
    stats: DedupStats,
}

/// 判定提交后对登记表的变更
#[derive(Debug)]
enum Change {
    Insert { fingerprint: Option<String> },
    Merge,
    Baseline,
    Nothing,
}

impl DedupState {
    fn apply(
        &mut self,
        identifier: &Identifier,
        record: &ExtractedRecord,
        change: Change,
        now: DateTime<Utc>,
    ) {
        match change {
            Change::Insert { fingerprint } => {
                self.seen.insert(
                    identifier.clone(),
                    SeenEntry {
                        last_seen: now,
                        snapshot: Some(Snapshot::of(record)),
                    },
                );
                if let Some(fp) = fingerprint {
                    self.fingerprints.insert(fp, identifier.clone());
                }
            }
            Change::Merge => {
                if let Some(entry) = self.seen.get_mut(identifier) {
                    if let Some(snapshot) = entry.snapshot.as_mut() {
                        snapshot.merge(record);
                    }
                    entry.last_seen = now;
                }
            }
            Change::Baseline => {
                if let Some(entry) = self.seen.get_mut(identifier) {
                    entry.snapshot = Some(Snapshot::of(record));
                }
            }
            Change::Nothing => {}
        }
    }

    fn evict_window(&mut self, now: Instant, span: Duration) {
        while let Some((at, _)) = self.window.front() {
            if now.duration_since(*at) > span {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// 去重 / 流窗口引擎
///
/// `SeenRegistry` 在进程生命周期内永久保留，仅观测窗口按时间淘汰。
/// 所有判定都在同一把公平锁下完成，同一标识的判定严格按到达顺序执行。
/// 每个部署只应有一个实例写入。
pub struct DedupEngine {
    state: Mutex<DedupState>,
    hydrated: OnceCell<()>,
    store: Option<Arc<dyn RecordRepository>>,
    window: Duration,
    fingerprint: bool,
}

impl DedupEngine {
    /// 创建去重引擎
    ///
    /// # 参数
    ///
    /// * `settings` - 去重配置
    /// * `store` - 用于启动预热的持久化记录存储
    pub fn new(settings: &DedupSettings, store: Option<Arc<dyn RecordRepository>>) -> Self {
        Self {
            state: Mutex::new(DedupState::default()),
            hydrated: OnceCell::new(),
            store,
            window: Duration::from_secs(settings.window_secs),
            fingerprint: settings.fingerprint,
        }
    }

    /// 对一条记录做去重判定
    ///
    /// 判定为 `Update` 时会把 `record.is_update` 置为 `true`
    pub async fn process(&self, record: &mut ExtractedRecord) -> Decision {
        match self
            .process_with(record, |_| future::ready(Ok::<(), Infallible>(())))
            .await
        {
            Ok(decision) => decision,
            Err(never) => match never {},
        }
    }

    /// 做去重判定，新记录和更新先交给 `commit`，成功后才写入已见登记表
    ///
    /// `commit` 在引擎锁内执行，同一标识的判定和提交不会交错。
    /// `commit` 失败时登记表、观测窗口和统计都保持不变，重投的同一记录会得到相同判定。
    ///
    /// # 参数
    ///
    /// * `record` - 待判定记录
    /// * `commit` - 接收需要下发的记录副本
    ///
    /// # 返回值
    ///
    /// 提交成功（或无需提交）时返回判定，否则返回 `commit` 的错误
    pub async fn process_with<F, Fut, E>(
        &self,
        record: &mut ExtractedRecord,
        commit: F,
    ) -> Result<Decision, E>
    where
        F: FnOnce(ExtractedRecord) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        self.ensure_hydrated().await;

        if let Err(e) = record.validate() {
            let decision = Decision::Rejected(RejectReason::Invalid(e.to_string()));
            let mut guard = self.state.lock().await;
            self.record_decision(&mut guard, &decision);
            return Ok(decision);
        }

        let identifier = record.identifier();
        let mut guard = self.state.lock().await;
        let (decision, change) = self.evaluate(&guard, &identifier, record);

        if decision.is_forwarded() {
            if decision == Decision::Update {
                record.is_update = true;
            }
            if let Err(e) = commit(record.clone()).await {
                warn!(identifier = %identifier, decision = decision.label(), "Commit failed, decision not recorded");
                counter!("dedup_commit_failures_total").increment(1);
                return Err(e);
            }
        }

        let state = &mut *guard;
        state.apply(&identifier, record, change, Utc::now());
        if decision.is_forwarded() {
            state.window.push_back((Instant::now(), identifier.clone()));
        }
        self.record_decision(state, &decision);
        drop(guard);

        debug!(identifier = %identifier, decision = decision.label(), "Dedup decision");
        Ok(decision)
    }

    /// 只读判定，返回判定结果和提交后要做的登记变更
    fn evaluate(
        &self,
        state: &DedupState,
        identifier: &Identifier,
        record: &ExtractedRecord,
    ) -> (Decision, Change) {
        match state.seen.get(identifier) {
            None => {
                let fingerprint = self.fingerprint.then(|| record.fingerprint());
                let near_duplicate = fingerprint
                    .as_ref()
                    .and_then(|fp| state.fingerprints.get(fp))
                    .filter(|owner| *owner != identifier);

                if let Some(owner) = near_duplicate {
                    debug!(identifier = %identifier, owner = %owner, "Near-duplicate content fingerprint");
                    (Decision::Duplicate, Change::Nothing)
                } else {
                    (Decision::Accepted, Change::Insert { fingerprint })
                }
            }
            Some(entry) => match &entry.snapshot {
                Some(snapshot) if snapshot.has_new_signal(record) => {
                    (Decision::Update, Change::Merge)
                }
                Some(_) => (Decision::Duplicate, Change::Nothing),
                // 预热条目首次出现时以本次取值作为基线
                None => (Decision::Duplicate, Change::Baseline),
            },
        }
    }

    fn record_decision(&self, state: &mut DedupState, decision: &Decision) {
        state.stats.total_processed += 1;
        match decision {
            Decision::Accepted => state.stats.accepted += 1,
            Decision::Update => state.stats.updates += 1,
            Decision::Duplicate => state.stats.duplicates_dropped += 1,
            Decision::Rejected(_) => state.stats.rejected += 1,
        }
        state.evict_window(Instant::now(), self.window);
        counter!("dedup_decisions_total", "decision" => decision.label()).increment(1);
        gauge!("dedup_window_size").set(state.window.len() as f64);
    }

    /// 当前统计信息
    pub async fn stats(&self) -> DedupStats {
        let mut state = self.state.lock().await;
        state.evict_window(Instant::now(), self.window);
        let mut stats = state.stats.clone();
        stats.unique_in_window = state.window.len();
        stats.seen_registry_size = state.seen.len();
        stats
    }

    /// 标识上次被接受或更新的时间
    pub async fn last_seen(&self, identifier: &Identifier) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .await
            .seen
            .get(identifier)
            .map(|entry| entry.last_seen)
    }

    /// 首次调用时从持久化存储加载全部标识；失败也只尝试一次
    async fn ensure_hydrated(&self) {
        self.hydrated
            .get_or_init(|| async {
                let Some(store) = &self.store else {
                    return;
                };
                match store.load_all_identifiers().await {
                    Ok(identifiers) => {
                        let count = identifiers.len();
                        let hydrated_at = Utc::now();
                        let mut state = self.state.lock().await;
                        for identifier in identifiers {
                            state.seen.entry(identifier).or_insert(SeenEntry {
                                last_seen: hydrated_at,
                                snapshot: None,
                            });
                        }
                        info!(count, "Seen registry hydrated from record store");
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to hydrate seen registry, starting empty");
                    }
                }
            })
            .await;
    }
}
