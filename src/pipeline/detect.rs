//! Change detection against the stored watermark.
//!
//! A detector looks at the merged, newest-first items of one entity and the
//! entity's watermark and decides what to announce. It never records an
//! announcement itself: the scanner calls [`ChangeDetector::consume`] once
//! per confirmed delivery, so a failed send leaves the item detectable on
//! the next run.

use std::collections::{HashMap, HashSet};

use crate::models::{DetectorConfig, DetectorKind, Item, LiveStatus, Watermark};

/// What kind of event a change announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    NewItem,
    WentLive,
    WentOffline,
}

/// One notification to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub item: Item,
}

impl Change {
    fn new_item(item: &Item) -> Self {
        Self {
            kind: ChangeKind::NewItem,
            item: item.clone(),
        }
    }
}

/// Output of a detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Changes in the order they must be dispatched.
    pub changes: Vec<Change>,
    /// Watermark before any change is consumed. Differs from the prior one
    /// only for silent updates (first observation, title refresh).
    pub baseline: Watermark,
}

impl Detection {
    fn unchanged(prior: &Watermark) -> Self {
        Self {
            changes: Vec::new(),
            baseline: prior.clone(),
        }
    }

    /// Watermark after every change has been delivered.
    #[cfg(test)]
    pub fn updated_watermark(&self, detector: &dyn ChangeDetector, merged: &[Item]) -> Watermark {
        let mut watermark = self.baseline.clone();
        for change in &self.changes {
            detector.consume(&mut watermark, change, merged);
        }
        watermark
    }
}

/// Shared interface of the detector variants.
pub trait ChangeDetector: Send + Sync {
    /// Watermark shape this detector reads and writes.
    fn kind(&self) -> DetectorKind;

    /// Compare `merged` (newest first, non-empty) with `prior`.
    fn detect(&self, merged: &[Item], prior: &Watermark) -> Detection;

    /// Record a delivered change in `watermark`.
    ///
    /// `merged` is the list the change was detected in.
    fn consume(&self, watermark: &mut Watermark, change: &Change, merged: &[Item]);
}

/// Build the detector configured for this deployment.
pub fn detector_for(config: &DetectorConfig) -> Box<dyn ChangeDetector> {
    match config.kind {
        DetectorKind::SeenSet => Box::new(SeenSetDetector::new(
            config.history_cap,
            config.notify_cap,
            config.seed_silently,
        )),
        DetectorKind::LatestId => Box::new(LatestIdDetector),
        DetectorKind::LiveStatus => Box::new(LiveStatusDetector),
    }
}

/// Bounded set of notified ids.
///
/// New items are those not in the set and newer than the oldest remembered
/// item still visible in the feed. At most `notify_cap` of the newest are
/// announced, oldest first, so chat messages read chronologically. The set
/// is kept ordered by content age and evicts the oldest content first.
#[derive(Debug, Clone)]
pub struct SeenSetDetector {
    history_cap: usize,
    notify_cap: usize,
    seed_silently: bool,
}

impl SeenSetDetector {
    pub fn new(history_cap: usize, notify_cap: usize, seed_silently: bool) -> Self {
        Self {
            history_cap: history_cap.max(1),
            notify_cap,
            seed_silently,
        }
    }

    fn truncate(&self, ids: &mut Vec<String>) {
        if ids.len() > self.history_cap {
            let excess = ids.len() - self.history_cap;
            ids.drain(..excess);
        }
    }

    /// Sort `ids` oldest content first. Ids no longer in `merged` have
    /// scrolled out of the feed and sort before everything still visible.
    fn order_by_age(ids: &mut [String], merged: &[Item]) {
        let recency: HashMap<&str, usize> = merged
            .iter()
            .enumerate()
            .map(|(pos, item)| (item.id.as_str(), merged.len() - pos))
            .collect();
        ids.sort_by_key(|id| recency.get(id.as_str()).copied().unwrap_or(0));
    }
}

impl ChangeDetector for SeenSetDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::SeenSet
    }

    fn detect(&self, merged: &[Item], prior: &Watermark) -> Detection {
        if merged.is_empty() {
            return Detection::unchanged(prior);
        }

        let empty: Vec<String> = Vec::new();
        let seen = match prior {
            Watermark::Seen(Some(ids)) => ids,
            Watermark::Seen(None) if self.seed_silently => {
                // First observation: remember everything, announce nothing.
                let mut ids: Vec<String> = merged.iter().rev().map(|i| i.id.clone()).collect();
                self.truncate(&mut ids);
                return Detection {
                    changes: Vec::new(),
                    baseline: Watermark::Seen(Some(ids)),
                };
            }
            _ => &empty,
        };

        let known: HashSet<&str> = seen.iter().map(String::as_str).collect();
        // Unknown items below the oldest remembered one were already
        // announced and evicted, or predate tracking.
        let horizon = merged
            .iter()
            .rposition(|item| known.contains(item.id.as_str()))
            .unwrap_or(merged.len());
        let mut changes: Vec<Change> = merged[..horizon]
            .iter()
            .filter(|item| !known.contains(item.id.as_str()))
            .take(self.notify_cap)
            .map(Change::new_item)
            .collect();
        changes.reverse();

        Detection {
            changes,
            baseline: prior.clone(),
        }
    }

    fn consume(&self, watermark: &mut Watermark, change: &Change, merged: &[Item]) {
        let mut ids = match std::mem::replace(watermark, Watermark::Seen(None)) {
            Watermark::Seen(Some(ids)) => ids,
            _ => Vec::new(),
        };
        if !ids.contains(&change.item.id) {
            ids.push(change.item.id.clone());
        }
        Self::order_by_age(&mut ids, merged);
        self.truncate(&mut ids);
        *watermark = Watermark::Seen(Some(ids));
    }
}

/// Single most-recent id.
///
/// Only the head of the merged list is compared. With no prior watermark the
/// head is adopted silently so a first run never backfills.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatestIdDetector;

impl ChangeDetector for LatestIdDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::LatestId
    }

    fn detect(&self, merged: &[Item], prior: &Watermark) -> Detection {
        let Some(head) = merged.first() else {
            return Detection::unchanged(prior);
        };

        match prior {
            Watermark::Latest(Some(latest)) if *latest == head.id => Detection::unchanged(prior),
            Watermark::Latest(Some(_)) => Detection {
                changes: vec![Change::new_item(head)],
                baseline: prior.clone(),
            },
            _ => Detection {
                changes: Vec::new(),
                baseline: Watermark::Latest(Some(head.id.clone())),
            },
        }
    }

    fn consume(&self, watermark: &mut Watermark, change: &Change, _merged: &[Item]) {
        *watermark = Watermark::Latest(Some(change.item.id.clone()));
    }
}

/// Edge-triggered live/offline detector.
///
/// The head item's id carries the status code (`"1"` live, `"0"` offline)
/// and its title the current room title.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveStatusDetector;

impl ChangeDetector for LiveStatusDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::LiveStatus
    }

    fn detect(&self, merged: &[Item], prior: &Watermark) -> Detection {
        let Some(head) = merged.first() else {
            return Detection::unchanged(prior);
        };
        let Some(current) = LiveStatus::from_code(&head.id) else {
            log::warn!("Unrecognized live status code '{}'", head.id);
            return Detection::unchanged(prior);
        };

        let (prior_status, cached_title) = match prior {
            Watermark::Status { status, title } => (*status, title.clone()),
            _ => (LiveStatus::Unknown, None),
        };
        let title = if head.title.trim().is_empty() {
            cached_title
        } else {
            Some(head.title.clone())
        };

        if prior_status == LiveStatus::Unknown {
            return Detection {
                changes: Vec::new(),
                baseline: Watermark::Status {
                    status: current,
                    title,
                },
            };
        }

        let baseline = Watermark::Status {
            status: prior_status,
            title: title.clone(),
        };
        if prior_status == current {
            return Detection {
                changes: Vec::new(),
                baseline,
            };
        }

        let kind = match current {
            LiveStatus::Live => ChangeKind::WentLive,
            _ => ChangeKind::WentOffline,
        };
        let mut item = head.clone();
        item.title = title.unwrap_or_default();

        Detection {
            changes: vec![Change { kind, item }],
            baseline,
        }
    }

    fn consume(&self, watermark: &mut Watermark, change: &Change, _merged: &[Item]) {
        let status = match change.kind {
            ChangeKind::WentLive => LiveStatus::Live,
            ChangeKind::WentOffline => LiveStatus::Offline,
            ChangeKind::NewItem => return,
        };
        let title = match watermark {
            Watermark::Status { title, .. } => title.take(),
            _ => None,
        };
        *watermark = Watermark::Status { status, title };
    }
}
