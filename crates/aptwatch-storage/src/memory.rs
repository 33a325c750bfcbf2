use std::collections::BTreeMap;

use aptwatch_core::{
    Announcement, NaturalKey, PricedUnitType, SourceFamily, StoredAnnouncement, Transaction,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{AnnouncementStore, StoreError, TransactionStore, UnitTypeStore};

#[derive(Debug, Default)]
struct MemoryState {
    announcements: BTreeMap<NaturalKey, StoredAnnouncement>,
    unit_types: BTreeMap<String, Vec<PricedUnitType>>,
    transactions: BTreeMap<String, Vec<Transaction>>,
}

/// In-process store keyed by natural key; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_transactions(&self, transactions: impl IntoIterator<Item = Transaction>) {
        let mut state = self.state.lock().await;
        for tx in transactions {
            state
                .transactions
                .entry(tx.admin_code.clone())
                .or_default()
                .push(tx);
        }
    }

    pub async fn announcement_count(&self) -> usize {
        self.state.lock().await.announcements.len()
    }

    pub async fn all_announcements(&self) -> Vec<StoredAnnouncement> {
        self.state
            .lock()
            .await
            .announcements
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AnnouncementStore for MemoryStore {
    async fn find_by_natural_key(
        &self,
        key: &NaturalKey,
    ) -> Result<Option<StoredAnnouncement>, StoreError> {
        Ok(self.state.lock().await.announcements.get(key).cloned())
    }

    async fn insert(&self, announcement: &Announcement) -> Result<StoredAnnouncement, StoreError> {
        let key = announcement.natural_key();
        let mut state = self.state.lock().await;
        if state.announcements.contains_key(&key) {
            return Err(StoreError::Conflict(key));
        }
        let stored = StoredAnnouncement {
            id: Uuid::new_v4(),
            announcement: announcement.clone(),
        };
        state.announcements.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, stored: &StoredAnnouncement) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let old_key = state
            .announcements
            .iter()
            .find(|(_, s)| s.id == stored.id)
            .map(|(k, _)| k.clone())
            .ok_or(StoreError::NotFound(stored.id))?;
        state.announcements.remove(&old_key);
        state
            .announcements
            .insert(stored.announcement.natural_key(), stored.clone());
        Ok(())
    }

    async fn delete_received_before(&self, cutoff: NaiveDate) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.announcements.len();
        state
            .announcements
            .retain(|_, s| s.announcement.receipt_start >= cutoff);
        Ok((before - state.announcements.len()) as u64)
    }

    async fn list_by_family_area(
        &self,
        family: SourceFamily,
        area: &str,
    ) -> Result<Vec<Announcement>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .announcements
            .values()
            .filter(|s| s.announcement.family == family && s.announcement.area == area)
            .map(|s| s.announcement.clone())
            .collect())
    }

    async fn list_by_family(
        &self,
        family: SourceFamily,
    ) -> Result<Vec<StoredAnnouncement>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .announcements
            .values()
            .filter(|s| s.announcement.family == family)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UnitTypeStore for MemoryStore {
    async fn unit_types_for(
        &self,
        management_no: &str,
    ) -> Result<Vec<PricedUnitType>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .unit_types
            .get(management_no)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_unit_types(&self, unit_types: &[PricedUnitType]) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut inserted = 0;
        for unit in unit_types {
            let existing = state
                .unit_types
                .entry(unit.management_no.clone())
                .or_default();
            if existing.iter().any(|u| u.house_type == unit.house_type) {
                continue;
            }
            existing.push(unit.clone());
            inserted += 1;
        }
        Ok(inserted)
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn transactions_for_code(
        &self,
        admin_code: &str,
    ) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .transactions
            .get(admin_code)
            .cloned()
            .unwrap_or_default())
    }
}
