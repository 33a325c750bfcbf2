use std::sync::Arc;

use aptwatch_core::{normalize_area_name, Announcement, SourceFamily};
use aptwatch_storage::AnnouncementStore;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{Provider, ProviderError};

/// Serves a family's announcements back out of the local store.
///
/// Only useful as the last resort for date lookups; full syncs skip it because it
/// would reconcile the store against itself.
#[derive(Clone)]
pub struct StoreMirrorProvider {
    family: SourceFamily,
    store: Arc<dyn AnnouncementStore>,
}

impl StoreMirrorProvider {
    pub fn new(family: SourceFamily, store: Arc<dyn AnnouncementStore>) -> Self {
        Self { family, store }
    }
}

#[async_trait]
impl Provider for StoreMirrorProvider {
    fn source_name(&self) -> &str {
        "store-mirror"
    }

    fn family(&self) -> SourceFamily {
        self.family
    }

    fn is_external_source(&self) -> bool {
        false
    }

    async fn fetch_for_date(
        &self,
        area: &str,
        date: NaiveDate,
    ) -> Result<Vec<Announcement>, ProviderError> {
        let mut found = self.fetch_all(area).await?;
        found.retain(|a| a.announce_date == Some(date));
        Ok(found)
    }

    async fn fetch_all(&self, area: &str) -> Result<Vec<Announcement>, ProviderError> {
        let area = normalize_area_name(area);
        Ok(self.store.list_by_family_area(self.family, &area).await?)
    }
}
