use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use aptwatch_core::{today_kst, Announcement, SourceFamily, SyncResult};
use aptwatch_providers::{FallbackChain, UnitTypeSource};
use aptwatch_storage::{AnnouncementStore, StoreError, UnitTypeStore};
use chrono::{Months, NaiveDate};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Announcements whose receipt started more than this many years ago are purged.
pub const RETENTION_YEARS: u32 = 5;

pub fn retention_cutoff(today: NaiveDate) -> NaiveDate {
    today
        .checked_sub_months(Months::new(RETENTION_YEARS * 12))
        .unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitTypeSyncSummary {
    pub candidates: usize,
    pub already_stored: usize,
    pub inserted: usize,
    pub failed: usize,
}

/// Folds every chain's current listings into the store by natural key.
pub struct ReconciliationService<S> {
    areas: Vec<String>,
    chains: Vec<FallbackChain>,
    store: Arc<S>,
}

impl<S> ReconciliationService<S>
where
    S: AnnouncementStore + UnitTypeStore,
{
    pub fn new(areas: Vec<String>, chains: Vec<FallbackChain>, store: Arc<S>) -> Self {
        Self {
            areas,
            chains,
            store,
        }
    }

    pub fn areas(&self) -> &[String] {
        &self.areas
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Run every chain's `try_all` for every area, in configuration order.
    ///
    /// A row whose store write fails is logged and counted in `failed`; the run carries on.
    pub async fn sync(&self) -> SyncResult {
        let mut total = SyncResult::default();

        for area in &self.areas {
            for chain in &self.chains {
                let report = chain.attempt_all(area).await;
                let mut chain_result = SyncResult::default();
                for announcement in &report.announcements {
                    let outcome = match self.upsert(announcement).await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            error!(
                                key = %announcement.natural_key(),
                                error = %err,
                                "failed to store announcement"
                            );
                            SyncResult::failed()
                        }
                    };
                    chain_result = chain_result.merge(outcome);
                }
                info!(
                    area = %area,
                    family = %chain.family(),
                    provider = report.accepted.as_deref().unwrap_or("-"),
                    fetched = report.announcements.len(),
                    result = %chain_result,
                    "area synced"
                );
                total = total.merge(chain_result);
            }
        }

        info!(result = %total, "sync finished");
        total
    }

    /// Insert, update or skip one announcement.
    pub async fn upsert(&self, incoming: &Announcement) -> Result<SyncResult, StoreError> {
        let key = incoming.natural_key();
        let Some(mut existing) = self.store.find_by_natural_key(&key).await? else {
            self.store.insert(incoming).await?;
            debug!(%key, "inserted announcement");
            return Ok(SyncResult::inserted());
        };

        let changed = existing.announcement.changed_fields(incoming);
        if changed.is_empty() {
            return Ok(SyncResult::skipped());
        }

        existing.announcement.apply_tracked_fields(incoming);
        self.store.update(&existing).await?;
        debug!(%key, ?changed, "updated announcement");
        Ok(SyncResult::updated())
    }

    /// Purge announcements past the retention window, counted from today in KST.
    pub async fn cleanup(&self) -> Result<u64> {
        self.cleanup_before(retention_cutoff(today_kst())).await
    }

    /// Delete announcements whose receipt started strictly before `cutoff`.
    pub async fn cleanup_before(&self, cutoff: NaiveDate) -> Result<u64> {
        let removed = self
            .store
            .delete_received_before(cutoff)
            .await
            .with_context(|| format!("deleting announcements received before {cutoff}"))?;
        info!(%cutoff, removed, "retention cleanup finished");
        Ok(removed)
    }

    /// Fetch priced unit types for stored announcements that do not have any yet.
    pub async fn sync_unit_types(&self, source: &dyn UnitTypeSource) -> Result<UnitTypeSyncSummary> {
        let mut management_nos = BTreeSet::new();
        for family in SourceFamily::ALL
            .into_iter()
            .filter(|f| f.publishes_market_pricing())
        {
            let stored = self
                .store
                .list_by_family(family)
                .await
                .with_context(|| format!("listing {family} announcements"))?;
            management_nos.extend(
                stored
                    .into_iter()
                    .filter_map(|s| s.announcement.management_no),
            );
        }

        let mut summary = UnitTypeSyncSummary {
            candidates: management_nos.len(),
            ..Default::default()
        };
        for management_no in &management_nos {
            match self.store.unit_types_for(management_no).await {
                Ok(existing) if !existing.is_empty() => {
                    summary.already_stored += 1;
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(%management_no, error = %err, "could not read stored unit types");
                    summary.failed += 1;
                    continue;
                }
            }

            let fetched = match source.fetch_unit_types(management_no).await {
                Ok(fetched) => fetched,
                Err(err) => {
                    warn!(%management_no, error = %err, "unit type fetch failed");
                    summary.failed += 1;
                    continue;
                }
            };
            match self.store.insert_unit_types(&fetched).await {
                Ok(n) => summary.inserted += n,
                Err(err) => {
                    error!(%management_no, error = %err, "failed to store unit types");
                    summary.failed += 1;
                }
            }
        }

        info!(
            candidates = summary.candidates,
            already_stored = summary.already_stored,
            inserted = summary.inserted,
            failed = summary.failed,
            "unit type sync finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn retention_cutoff_is_five_calendar_years_back() {
        assert_eq!(retention_cutoff(date(2024, 5, 20)), date(2019, 5, 20));
        assert_eq!(retention_cutoff(date(2024, 2, 29)), date(2019, 2, 28));
    }
}
