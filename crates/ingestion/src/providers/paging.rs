//! Restartable paging over provider continuation tokens
//!
//! Providers hand out opaque continuation tokens. [`pages`] turns a fetch function into
//! a lazy stream of pages that can be resumed from any token, and [`collect_bounded`]
//! drains it until one of the explicit stop predicates fires.

use futures::{Stream, TryStreamExt};
use std::future::Future;

use crate::Result;

/// One page of provider results
#[derive(Debug, Clone)]
pub struct ContinuationPage<T> {
    pub items: Vec<T>,
    /// Token for the following page; `None` on the last page
    pub next: Option<String>,
}

/// Why collection stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Exhausted,
    ItemCap,
    PageCap,
    NothingRecent,
}

/// Stop predicates for [`collect_bounded`]
pub struct StopPolicy<'a, T> {
    pub max_items: usize,
    pub max_pages: usize,
    /// Stop after the first page that has no item matching this predicate
    pub recent: Option<&'a (dyn Fn(&T) -> bool + Send + Sync)>,
}

impl<T> StopPolicy<'_, T> {
    pub fn capped(max_items: usize) -> Self {
        Self {
            max_items,
            max_pages: usize::MAX,
            recent: None,
        }
    }

    pub fn with_page_cap(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }
}

/// Items gathered plus the token to resume from
#[derive(Debug)]
pub struct Collected<T> {
    pub items: Vec<T>,
    pub resume_from: Option<String>,
    pub stop: StopReason,
}

/// Lazy sequence of pages starting at `start` (`None` = first page)
pub fn pages<T, F, Fut>(
    start: Option<String>,
    fetch: F,
) -> impl Stream<Item = Result<ContinuationPage<T>>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ContinuationPage<T>>>,
{
    futures::stream::try_unfold((Some(start), fetch), |(cursor, mut fetch)| async move {
        let Some(token) = cursor else {
            return Ok(None);
        };
        let page = fetch(token).await?;
        let next = page.next.clone().map(Some);
        Ok(Some((page, (next, fetch))))
    })
}

/// Drain `stream` until it ends or a stop predicate fires
pub async fn collect_bounded<T, S>(stream: S, policy: &StopPolicy<'_, T>) -> Result<Collected<T>>
where
    S: Stream<Item = Result<ContinuationPage<T>>>,
{
    futures::pin_mut!(stream);

    let mut items = Vec::new();
    let mut page_count = 0usize;

    while let Some(page) = stream.try_next().await? {
        page_count += 1;
        let has_recent = policy
            .recent
            .map_or(true, |recent| page.items.iter().any(|item| recent(item)));
        let resume_from = page.next.clone();
        items.extend(page.items);

        let stop = if items.len() >= policy.max_items {
            items.truncate(policy.max_items);
            Some(StopReason::ItemCap)
        } else if !has_recent {
            Some(StopReason::NothingRecent)
        } else if page_count >= policy.max_pages {
            Some(StopReason::PageCap)
        } else {
            None
        };

        if let Some(stop) = stop {
            return Ok(Collected {
                items,
                resume_from,
                stop,
            });
        }
    }

    Ok(Collected {
        items,
        resume_from: None,
        stop: StopReason::Exhausted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Pages of three numbers: page n holds 3n, 3n+1, 3n+2; five pages in total
    fn numbered(
        calls: Arc<AtomicUsize>,
    ) -> impl FnMut(Option<String>) -> futures::future::Ready<Result<ContinuationPage<u32>>> {
        move |token| {
            calls.fetch_add(1, Ordering::SeqCst);
            let page: u32 = token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let items = (page * 3..page * 3 + 3).collect();
            let next = (page < 4).then(|| (page + 1).to_string());
            futures::future::ready(Ok(ContinuationPage { items, next }))
        }
    }

    #[tokio::test]
    async fn test_exhausts_all_pages() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stream = pages(None, numbered(calls.clone()));
        let collected = collect_bounded(stream, &StopPolicy::capped(100))
            .await
            .unwrap();

        assert_eq!(collected.items.len(), 15);
        assert_eq!(collected.stop, StopReason::Exhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_item_cap_stops_fetching() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stream = pages(None, numbered(calls.clone()));
        let collected = collect_bounded(stream, &StopPolicy::capped(4))
            .await
            .unwrap();

        assert_eq!(collected.items, vec![0, 1, 2, 3]);
        assert_eq!(collected.stop, StopReason::ItemCap);
        assert_eq!(collected.resume_from.as_deref(), Some("2"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resume_from_token() {
        let calls = Arc::new(AtomicUsize::new(0));
        let collected = collect_bounded(
            pages(Some("3".to_string()), numbered(calls)),
            &StopPolicy::capped(100),
        )
        .await
        .unwrap();

        assert_eq!(collected.items, vec![9, 10, 11, 12, 13, 14]);
    }

    #[tokio::test]
    async fn test_stops_on_page_without_recent_items() {
        let calls = Arc::new(AtomicUsize::new(0));
        let recent = |n: &u32| *n < 5;
        let policy = StopPolicy {
            max_items: 100,
            max_pages: usize::MAX,
            recent: Some(&recent),
        };

        let collected = collect_bounded(pages(None, numbered(calls.clone())), &policy)
            .await
            .unwrap();

        assert_eq!(collected.stop, StopReason::NothingRecent);
        assert_eq!(collected.items.len(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_page_cap() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = StopPolicy::capped(100).with_page_cap(2);

        let collected = collect_bounded(pages(None, numbered(calls)), &policy)
            .await
            .unwrap();
        assert_eq!(collected.stop, StopReason::PageCap);
        assert_eq!(collected.items.len(), 6);
    }
}
