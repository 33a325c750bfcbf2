use aptwatch_core::Announcement;
use aptwatch_providers::FallbackChain;
use chrono::NaiveDate;
use tracing::info;

/// Gathers one day's announcements across every area and chain.
pub struct Collector {
    areas: Vec<String>,
    chains: Vec<FallbackChain>,
}

impl Collector {
    pub fn new(areas: Vec<String>, chains: Vec<FallbackChain>) -> Self {
        Self { areas, chains }
    }

    pub fn areas(&self) -> &[String] {
        &self.areas
    }

    pub async fn collect_for_date(&self, date: NaiveDate) -> Vec<Announcement> {
        let mut collected = Vec::new();
        for area in &self.areas {
            for chain in &self.chains {
                let found = chain.try_date(area, date).await;
                info!(area = %area, family = %chain.family(), %date, found = found.len(), "collected");
                collected.extend(found);
            }
        }
        collected
    }
}
