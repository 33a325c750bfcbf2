use aptwatch_core::{Announcement, SourceFamily};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{Provider, ProviderError};

/// How a single provider attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success(usize),
    /// Provider answered with no records; still a terminal, accepted outcome.
    Empty,
    Failed(String),
    /// Not attempted because it only mirrors the local store.
    Skipped,
}

impl AttemptOutcome {
    fn accepted(&self) -> bool {
        matches!(self, AttemptOutcome::Success(_) | AttemptOutcome::Empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub family: SourceFamily,
    /// Provider whose answer was used, if any was.
    pub accepted: Option<String>,
    pub announcements: Vec<Announcement>,
    pub attempts: Vec<ProviderAttempt>,
}

impl ChainReport {
    pub fn exhausted(&self) -> bool {
        self.accepted.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    ForDate(NaiveDate),
    All,
}

/// Ordered providers for one source family, tried until one answers.
pub struct FallbackChain {
    family: SourceFamily,
    providers: Vec<Box<dyn Provider>>,
}

impl FallbackChain {
    pub fn new(family: SourceFamily, providers: Vec<Box<dyn Provider>>) -> Self {
        Self { family, providers }
    }

    pub fn family(&self) -> SourceFamily {
        self.family
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.source_name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn try_date(&self, area: &str, date: NaiveDate) -> Vec<Announcement> {
        self.attempt_date(area, date).await.announcements
    }

    pub async fn try_all(&self, area: &str) -> Vec<Announcement> {
        self.attempt_all(area).await.announcements
    }

    pub async fn attempt_date(&self, area: &str, date: NaiveDate) -> ChainReport {
        self.run(area, Operation::ForDate(date)).await
    }

    /// Like [`attempt_date`](Self::attempt_date) over every current listing; store mirrors are skipped.
    pub async fn attempt_all(&self, area: &str) -> ChainReport {
        self.run(area, Operation::All).await
    }

    async fn run(&self, area: &str, op: Operation) -> ChainReport {
        let mut attempts = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let name = provider.source_name().to_string();
            if matches!(op, Operation::All) && !provider.is_external_source() {
                debug!(family = %self.family, provider = %name, area, "skipping non-external provider");
                attempts.push(ProviderAttempt {
                    provider: name,
                    outcome: AttemptOutcome::Skipped,
                });
                continue;
            }

            let result: Result<Vec<Announcement>, ProviderError> = match op {
                Operation::ForDate(date) => provider.fetch_for_date(area, date).await,
                Operation::All => provider.fetch_all(area).await,
            };

            let outcome = match &result {
                Ok(found) if found.is_empty() => AttemptOutcome::Empty,
                Ok(found) => AttemptOutcome::Success(found.len()),
                Err(err) => {
                    warn!(family = %self.family, provider = %name, area, error = %err, "provider failed; trying next");
                    AttemptOutcome::Failed(err.to_string())
                }
            };
            let accepted = outcome.accepted();
            debug!(family = %self.family, provider = %name, area, ?outcome, "provider attempt");
            attempts.push(ProviderAttempt {
                provider: name.clone(),
                outcome,
            });

            if accepted {
                return ChainReport {
                    family: self.family,
                    accepted: Some(name),
                    announcements: result.unwrap_or_default(),
                    attempts,
                };
            }
        }

        warn!(
            family = %self.family,
            area,
            providers = attempts.len(),
            "every provider in the chain failed; returning no announcements"
        );
        ChainReport {
            family: self.family,
            accepted: None,
            announcements: Vec::new(),
            attempts,
        }
    }
}
