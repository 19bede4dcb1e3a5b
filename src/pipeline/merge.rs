//! Combining several sources into one item list per entity.

use std::collections::HashSet;

use crate::models::{Item, MergeStrategy, TrackedEntity};
use crate::pipeline::retry::{RetryPolicy, retry_with_backoff};
use crate::services::Fetcher;

/// Result of asking every relevant source about one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// At least one source answered; items are newest first per source,
    /// sources in priority order, ids unique.
    Items(Vec<Item>),
    /// Every source failed.
    Unavailable,
}

impl MergeOutcome {
    /// Items to run detection on, if there are any.
    pub fn items(&self) -> Option<&[Item]> {
        match self {
            Self::Items(items) if !items.is_empty() => Some(items),
            _ => None,
        }
    }
}

/// Merge policy backed by retry-wrapped fetchers.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    strategy: MergeStrategy,
    retry: RetryPolicy,
}

impl MergePolicy {
    pub fn new(strategy: MergeStrategy, retry: RetryPolicy) -> Self {
        Self { strategy, retry }
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Collect items for `entity` from `fetchers`.
    ///
    /// Fetchers are consulted in ascending priority; ties keep slice order.
    pub async fn collect(
        &self,
        fetchers: &[Box<dyn Fetcher>],
        entity: &TrackedEntity,
    ) -> MergeOutcome {
        let mut ordered: Vec<&dyn Fetcher> = fetchers
            .iter()
            .map(|f| &**f)
            .filter(|f| entity.uses_source(f.source_tag()))
            .collect();
        ordered.sort_by_key(|f| f.priority());

        let mut any_answered = false;
        let mut merged = Vec::new();

        for fetcher in ordered {
            let Some(items) = self.fetch_one(fetcher, entity).await else {
                continue;
            };
            any_answered = true;

            match self.strategy {
                MergeStrategy::StrictFallback => {
                    if !items.is_empty() {
                        return MergeOutcome::Items(dedup_by_id(items));
                    }
                    log::info!(
                        "{} returned nothing for {}, trying next source",
                        fetcher.source_tag(),
                        entity.id
                    );
                }
                MergeStrategy::MergeAll => merged.extend(items),
            }
        }

        if any_answered {
            MergeOutcome::Items(dedup_by_id(merged))
        } else {
            log::error!("All sources failed for {}", entity.id);
            MergeOutcome::Unavailable
        }
    }

    async fn fetch_one(&self, fetcher: &dyn Fetcher, entity: &TrackedEntity) -> Option<Vec<Item>> {
        let label = format!("{}/{}", fetcher.source_tag(), entity.id);
        match retry_with_backoff(&self.retry, &label, |_| fetcher.fetch(entity)).await {
            Ok(items) => {
                log::info!("{} items for {}: {}", fetcher.source_tag(), entity.id, items.len());
                Some(items)
            }
            Err(e) => {
                log::warn!("{} failed for {}: {}", fetcher.source_tag(), entity.id, e);
                None
            }
        }
    }
}

/// Drop repeated ids, keeping the first occurrence.
pub fn dedup_by_id(items: Vec<Item>) -> Vec<Item> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect()
}
