// src/pipeline/scan.rs

//! One scan over every tracked entity.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{Config, TrackedEntity};
use crate::pipeline::detect::{ChangeDetector, detector_for};
use crate::pipeline::dispatch::Dispatcher;
use crate::pipeline::merge::{MergeOutcome, MergePolicy};
use crate::services::{Fetcher, TelegramNotifier, build_fetchers};
use crate::storage::{LocalStateStore, StateStore};
use crate::utils::http::create_async_client;

/// Summary of a scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Entities processed
    pub entity_count: usize,
    /// Entities left untouched because no source answered with items
    pub skipped_count: usize,
    /// Messages delivered (self-check excluded)
    pub notified_count: usize,
    /// Messages that failed and will be retried next run
    pub failed_count: usize,
}

/// Drives fetch → merge → detect → dispatch for every entity, then commits state.
pub struct Scanner {
    entities: Vec<TrackedEntity>,
    fetchers: Vec<Box<dyn Fetcher>>,
    merge: MergePolicy,
    detector: Box<dyn ChangeDetector>,
    dispatcher: Dispatcher,
    store: Box<dyn StateStore>,
}

impl Scanner {
    pub fn new(
        entities: Vec<TrackedEntity>,
        fetchers: Vec<Box<dyn Fetcher>>,
        merge: MergePolicy,
        detector: Box<dyn ChangeDetector>,
        dispatcher: Dispatcher,
        store: Box<dyn StateStore>,
    ) -> Self {
        Self {
            entities,
            fetchers,
            merge,
            detector,
            dispatcher,
            store,
        }
    }

    /// Wire the production adapters from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = create_async_client(&config.fetch)?;
        let fetchers = build_fetchers(&config.fetch, &client)?;
        let notifier = Arc::new(TelegramNotifier::new(&config.telegram)?);

        Ok(Self::new(
            config.entities.clone(),
            fetchers,
            MergePolicy::new(config.merge, config.retry.clone()),
            detector_for(&config.detector),
            Dispatcher::new(notifier, config),
            Box::new(LocalStateStore::new(
                &config.paths.state_file,
                config.detector.kind,
            )),
        ))
    }

    /// Run one scan.
    ///
    /// Fails only if the self-check fails (before any state is read) or the
    /// final state cannot be written.
    pub async fn run(&mut self) -> Result<ScanReport> {
        let start_time = Utc::now();

        self.dispatcher.self_check().await?;

        let mut state = self.store.load().await;
        let kind = self.detector.kind();
        log::info!(
            "Scanning {} entities ({:?} merge, {:?} detector)",
            self.entities.len(),
            self.merge.strategy(),
            kind
        );
        let mut report = ScanReport {
            start_time,
            end_time: start_time,
            entity_count: self.entities.len(),
            skipped_count: 0,
            notified_count: 0,
            failed_count: 0,
        };

        for entity in &self.entities {
            log::info!("Fetching {}…", entity.id);

            let outcome = self.merge.collect(&self.fetchers, entity).await;
            let items = match &outcome {
                MergeOutcome::Items(items) if !items.is_empty() => items,
                MergeOutcome::Items(_) => {
                    log::info!("No items for {}, watermark kept", entity.id);
                    report.skipped_count += 1;
                    continue;
                }
                MergeOutcome::Unavailable => {
                    log::warn!("No source answered for {}, watermark kept", entity.id);
                    report.skipped_count += 1;
                    continue;
                }
            };

            let prior = state.watermark(&entity.id, kind);
            let detection = self.detector.detect(items, &prior);
            log::info!("New items for {}: {}", entity.id, detection.changes.len());

            let mut watermark = detection.baseline;
            for change in &detection.changes {
                if self.dispatcher.deliver(entity, change).await {
                    self.detector.consume(&mut watermark, change, items);
                    report.notified_count += 1;
                } else {
                    report.failed_count += 1;
                }
            }

            if watermark != prior {
                state.set_watermark(&entity.id, watermark);
            }
        }

        self.store.save(&state).await?;

        if report.notified_count == 0 {
            log::info!("No new updates");
        }
        report.end_time = Utc::now();
        Ok(report)
    }
}

/// Build a scanner from configuration and run it once.
pub async fn run_scan(config: &Config) -> Result<ScanReport> {
    let mut scanner = Scanner::from_config(config)?;
    scanner.run().await
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::error::AppError;
    use crate::models::{DetectorKind, Item, MergeStrategy, PersistedState};
    use crate::pipeline::RetryPolicy;
    use crate::services::Notifier;

    /// Fetcher serving a mutable, shared item list per entity.
    struct ScriptedFetcher {
        tag: &'static str,
        priority: u8,
        items: Arc<Mutex<HashMap<String, Vec<Item>>>>,
        failing: Arc<Mutex<HashSet<String>>>,
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        fn source_tag(&self) -> &str {
            self.tag
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        async fn fetch(&self, entity: &TrackedEntity) -> Result<Vec<Item>> {
            if self.failing.lock().unwrap().contains(&entity.id) {
                return Err(AppError::fetch(self.tag, "HTTP 503"));
            }
            Ok(self
                .items
                .lock()
                .unwrap()
                .get(&entity.id)
                .cloned()
                .unwrap_or_default())
        }
    }

    /// Notifier recording sent texts; fails on texts containing a marker.
    #[derive(Default)]
    struct FakeNotifier {
        sent: Mutex<Vec<String>>,
        fail_marker: Mutex<Option<String>>,
        reject_all: bool,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn send(&self, text: &str) -> Result<()> {
            if self.reject_all {
                return Err(AppError::auth("HTTP 401"));
            }
            if let Some(marker) = self.fail_marker.lock().unwrap().as_deref() {
                if text.contains(marker) {
                    return Err(AppError::delivery("HTTP 502"));
                }
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    impl FakeNotifier {
        /// Sent messages minus the self-check.
        fn notifications(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().skip(1).cloned().collect()
        }

        fn clear(&self) {
            self.sent.lock().unwrap().clear();
        }
    }

    struct Harness {
        _tmp: TempDir,
        config: Config,
        items: Arc<Mutex<HashMap<String, Vec<Item>>>>,
        failing: Arc<Mutex<HashSet<String>>>,
        notifier: Arc<FakeNotifier>,
    }

    impl Harness {
        fn new(kind: DetectorKind, entities: &[&str]) -> Self {
            Self::with_notifier(kind, entities, FakeNotifier::default())
        }

        fn with_notifier(kind: DetectorKind, entities: &[&str], notifier: FakeNotifier) -> Self {
            let tmp = TempDir::new().unwrap();
            let mut config = Config::default();
            config.paths.state_file = tmp.path().join("state.json");
            config.detector.kind = kind;
            config.dispatch.send_delay_ms = 0;
            config.dispatch.templates.new_item = "{entity}:{id}".into();
            config.dispatch.templates.link = String::new();
            config.dispatch.templates.went_live = "{entity}:live".into();
            config.dispatch.templates.went_offline = "{entity}:offline".into();
            config.retry = RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                jitter_ms: 0,
                max_delay_ms: 1,
            };
            config.entities = entities.iter().map(|e| TrackedEntity::new(*e)).collect();

            Self {
                _tmp: tmp,
                config,
                items: Arc::default(),
                failing: Arc::default(),
                notifier: Arc::new(notifier),
            }
        }

        fn set_items(&self, entity: &str, ids: &[&str]) {
            let items = ids
                .iter()
                .map(|id| Item::new(*id, format!("Title {id}"), "dynamic"))
                .collect();
            self.items.lock().unwrap().insert(entity.to_string(), items);
        }

        fn set_status(&self, entity: &str, code: &str) {
            let items = vec![Item::new(code, "Room", "live")];
            self.items.lock().unwrap().insert(entity.to_string(), items);
        }

        fn set_failing(&self, entity: &str, failing: bool) {
            let mut set = self.failing.lock().unwrap();
            if failing {
                set.insert(entity.to_string());
            } else {
                set.remove(entity);
            }
        }

        fn scanner(&self) -> Scanner {
            let fetcher = ScriptedFetcher {
                tag: "dynamic",
                priority: 0,
                items: Arc::clone(&self.items),
                failing: Arc::clone(&self.failing),
            };
            Scanner::new(
                self.config.entities.clone(),
                vec![Box::new(fetcher)],
                MergePolicy::new(MergeStrategy::StrictFallback, self.config.retry.clone()),
                detector_for(&self.config.detector),
                Dispatcher::new(self.notifier.clone(), &self.config),
                Box::new(LocalStateStore::new(
                    &self.config.paths.state_file,
                    self.config.detector.kind,
                )),
            )
        }

        async fn run(&self) -> Result<ScanReport> {
            self.notifier.clear();
            self.scanner().run().await
        }

        fn state_bytes(&self) -> Option<Vec<u8>> {
            std::fs::read(&self.config.paths.state_file).ok()
        }

        fn state(&self) -> PersistedState {
            let bytes = self.state_bytes().unwrap();
            PersistedState::from_json(&bytes, self.config.detector.kind)
                .unwrap()
                .0
        }
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let h = Harness::new(DetectorKind::SeenSet, &["1"]);
        std::fs::write(&h.config.paths.state_file, br#"{"seen": {"1": []}}"#).unwrap();
        h.set_items("1", &["C", "B", "A"]);

        let first = h.run().await.unwrap();
        assert_eq!(first.notified_count, 3);
        assert_eq!(h.notifier.notifications(), vec!["1:A", "1:B", "1:C"]);

        let second = h.run().await.unwrap();
        assert_eq!(second.notified_count, 0);
        assert!(h.notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_first_run_records_without_notifying() {
        for kind in [DetectorKind::SeenSet, DetectorKind::LatestId] {
            let h = Harness::new(kind, &["1"]);
            h.set_items("1", &["C", "B", "A"]);

            let report = h.run().await.unwrap();
            assert_eq!(report.notified_count, 0);
            assert!(h.notifier.notifications().is_empty());

            let state = h.state();
            match kind {
                DetectorKind::SeenSet => assert_eq!(state.seen["1"], vec!["A", "B", "C"]),
                _ => assert_eq!(state.latest["1"], "C"),
            }
        }
    }

    #[tokio::test]
    async fn test_failed_entity_keeps_exact_watermark() {
        let h = Harness::new(DetectorKind::SeenSet, &["1", "2"]);
        h.set_items("1", &["B", "A"]);
        h.set_items("2", &["Y", "X"]);
        h.run().await.unwrap();
        let before = h.state();

        h.set_items("1", &["D", "C", "B", "A"]);
        h.set_items("2", &["Z", "Y", "X"]);
        h.set_failing("1", true);
        let report = h.run().await.unwrap();
        let after = h.state();

        assert_eq!(report.skipped_count, 1);
        assert_eq!(
            serde_json::to_vec(&before.seen["1"]).unwrap(),
            serde_json::to_vec(&after.seen["1"]).unwrap()
        );
        assert_eq!(h.notifier.notifications(), vec!["2:Z"]);
    }

    #[tokio::test]
    async fn test_empty_result_keeps_watermark() {
        let h = Harness::new(DetectorKind::LatestId, &["1"]);
        h.set_items("1", &["A"]);
        h.run().await.unwrap();

        h.set_items("1", &[]);
        let report = h.run().await.unwrap();
        assert_eq!(report.skipped_count, 1);
        assert_eq!(h.state().latest["1"], "A");
    }

    #[tokio::test]
    async fn test_history_never_exceeds_cap() {
        let mut h = Harness::new(DetectorKind::SeenSet, &["1"]);
        h.config.detector.history_cap = 4;

        let mut ids: Vec<String> = Vec::new();
        for n in 0..10 {
            ids.insert(0, format!("id{n}"));
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            h.set_items("1", &refs);
            h.run().await.unwrap();

            assert!(h.state().seen["1"].len() <= 4);
        }
        assert_eq!(h.state().seen["1"], vec!["id6", "id7", "id8", "id9"]);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_retried_next_run() {
        let h = Harness::new(DetectorKind::SeenSet, &["1"]);
        h.set_items("1", &["B", "A"]);
        h.run().await.unwrap();

        h.set_items("1", &["D", "C", "B", "A"]);
        *h.notifier.fail_marker.lock().unwrap() = Some("1:D".into());
        let report = h.run().await.unwrap();

        assert_eq!(report.notified_count, 1);
        assert_eq!(report.failed_count, 1);
        assert_eq!(h.notifier.notifications(), vec!["1:C"]);
        assert!(!h.state().seen["1"].contains(&"D".to_string()));

        *h.notifier.fail_marker.lock().unwrap() = None;
        h.run().await.unwrap();
        assert_eq!(h.notifier.notifications(), vec!["1:D"]);
        assert!(h.state().seen["1"].contains(&"D".to_string()));
    }

    #[tokio::test]
    async fn test_self_check_failure_aborts_before_state() {
        let h = Harness::with_notifier(
            DetectorKind::SeenSet,
            &["1"],
            FakeNotifier {
                reject_all: true,
                ..Default::default()
            },
        );
        h.set_items("1", &["A"]);

        let result = h.run().await;
        assert!(matches!(result, Err(AppError::SelfCheck(_))));
        assert!(h.state_bytes().is_none());
    }

    #[tokio::test]
    async fn test_live_status_edge_trigger() {
        let h = Harness::new(DetectorKind::LiveStatus, &["7"]);

        h.set_status("7", "1");
        h.run().await.unwrap();
        assert!(h.notifier.notifications().is_empty());
        assert_eq!(h.state().status["7"], 1);

        h.set_status("7", "0");
        h.run().await.unwrap();
        assert_eq!(h.notifier.notifications(), vec!["7:offline"]);
        assert_eq!(h.state().status["7"], 0);

        h.run().await.unwrap();
        assert!(h.notifier.notifications().is_empty());
        assert_eq!(h.state().titles["7"], "Room");
    }

    #[tokio::test]
    async fn test_entities_processed_in_order() {
        let h = Harness::new(DetectorKind::LatestId, &["b", "a"]);
        h.set_items("a", &["1"]);
        h.set_items("b", &["1"]);
        h.run().await.unwrap();

        h.set_items("a", &["2"]);
        h.set_items("b", &["2"]);
        h.run().await.unwrap();
        assert_eq!(h.notifier.notifications(), vec!["b:2", "a:2"]);
    }
}
