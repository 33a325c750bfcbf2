//! Record stores for announcements, unit pricing and transactions, plus the upstream HTTP fetcher.

use aptwatch_core::{
    Announcement, NaturalKey, PricedUnitType, SourceFamily, StoredAnnouncement, Transaction,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

pub mod http;
mod memory;
mod postgres;

pub use http::{BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig, HttpFetcher};
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "aptwatch-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("announcement {0} already exists")]
    Conflict(NaturalKey),
    #[error("announcement {0} not found")]
    NotFound(Uuid),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait AnnouncementStore: Send + Sync {
    async fn find_by_natural_key(
        &self,
        key: &NaturalKey,
    ) -> Result<Option<StoredAnnouncement>, StoreError>;

    async fn insert(&self, announcement: &Announcement) -> Result<StoredAnnouncement, StoreError>;

    /// Persist the tracked fields of an existing row.
    async fn update(&self, stored: &StoredAnnouncement) -> Result<(), StoreError>;

    /// Delete rows whose receipt-start date is strictly before `cutoff`.
    async fn delete_received_before(&self, cutoff: NaiveDate) -> Result<u64, StoreError>;

    async fn list_by_family_area(
        &self,
        family: SourceFamily,
        area: &str,
    ) -> Result<Vec<Announcement>, StoreError>;

    async fn list_by_family(
        &self,
        family: SourceFamily,
    ) -> Result<Vec<StoredAnnouncement>, StoreError>;
}

#[async_trait]
pub trait UnitTypeStore: Send + Sync {
    async fn unit_types_for(&self, management_no: &str)
        -> Result<Vec<PricedUnitType>, StoreError>;

    /// Insert unit types not yet stored; existing (management_no, house_type) rows are kept as-is.
    async fn insert_unit_types(&self, unit_types: &[PricedUnitType]) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn transactions_for_code(&self, admin_code: &str)
        -> Result<Vec<Transaction>, StoreError>;
}
