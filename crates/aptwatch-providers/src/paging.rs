use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingConfig {
    pub page_size: usize,
    /// Fixed pause between consecutive page requests to the same upstream.
    pub page_delay: Duration,
    pub max_pages: u32,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            page_delay: Duration::from_millis(100),
            max_pages: 50,
        }
    }
}

/// One upstream page after record mapping.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Records present in the raw response, including ones dropped while mapping.
    pub raw_count: usize,
    /// Total record count reported by the upstream, when it reports one.
    pub total: Option<usize>,
}

/// Request pages `1..` sequentially until the upstream is drained.
pub async fn paginate<T, F, Fut>(
    config: PagingConfig,
    mut fetch_page: F,
) -> Result<Vec<T>, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, ProviderError>>,
{
    let mut items = Vec::new();
    let mut seen_raw = 0usize;

    for page_no in 1..=config.max_pages {
        if page_no > 1 && !config.page_delay.is_zero() {
            tokio::time::sleep(config.page_delay).await;
        }

        let page = fetch_page(page_no).await?;
        seen_raw += page.raw_count;
        debug!(page_no, raw_count = page.raw_count, kept = page.items.len(), "fetched page");
        items.extend(page.items);

        let drained = match page.total {
            Some(total) => seen_raw >= total,
            None => false,
        };
        if page.raw_count == 0 || page.raw_count < config.page_size || drained {
            return Ok(items);
        }
        if page_no == config.max_pages {
            warn!(max_pages = config.max_pages, "page cap reached; upstream may hold more records");
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn config(page_size: usize) -> PagingConfig {
        PagingConfig {
            page_size,
            page_delay: Duration::ZERO,
            max_pages: 10,
        }
    }

    #[tokio::test]
    async fn stops_once_reported_total_is_reached() {
        let requested = RefCell::new(Vec::new());
        let items = paginate(config(2), |page_no| {
            requested.borrow_mut().push(page_no);
            async move {
                Ok(Page {
                    items: vec![page_no; 2],
                    raw_count: 2,
                    total: Some(4),
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(items, vec![1, 1, 2, 2]);
        assert_eq!(*requested.borrow(), vec![1, 2]);
    }

    #[tokio::test]
    async fn dropped_records_do_not_end_pagination_early() {
        let items = paginate(config(2), |page_no| async move {
            let kept = if page_no == 1 { vec![1] } else { vec![] };
            Ok(Page {
                items: kept,
                raw_count: if page_no <= 2 { 2 } else { 0 },
                total: None,
            })
        })
        .await
        .unwrap();
        assert_eq!(items, vec![1]);
    }

    #[tokio::test]
    async fn page_error_propagates_to_the_provider() {
        let result: Result<Vec<u32>, _> = paginate(config(2), |page_no| async move {
            if page_no == 2 {
                Err(ProviderError::parse("test", "broken page"))
            } else {
                Ok(Page {
                    items: vec![page_no],
                    raw_count: 2,
                    total: None,
                })
            }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Parse { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_pages() {
        let started = tokio::time::Instant::now();
        let cfg = PagingConfig {
            page_delay: Duration::from_millis(100),
            ..config(1)
        };
        let items = paginate(cfg, |page_no| async move {
            Ok(Page {
                items: vec![page_no],
                raw_count: 1,
                total: Some(3),
            })
        })
        .await
        .unwrap();
        assert_eq!(items.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
