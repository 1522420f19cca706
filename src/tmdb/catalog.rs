//! Page-stitching and sampling on top of the gateway.
//!
//! TMDB paginates at ~20 items per page; the application exposes 50-item
//! pages, so one application page spans 3 consecutive provider pages. Fetches
//! within one aggregation run concurrently and are joined before the merge;
//! completion order never shows in the output (keyword results are re-sorted,
//! genre results are shuffled).

use futures::future::try_join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashSet;

use super::client::{MovieApi, TmdbError};
use super::models::{MovieSummary, SearchResultPage};

pub const APP_PAGE_SIZE: usize = 50;
/// Provider pages stitched into one application page.
const PROVIDER_SPAN: u32 = 3;
/// TMDB refuses page numbers above 500.
const PROVIDER_PAGE_CAP: u32 = 500;
/// Distinct provider pages sampled for a genre draw.
const SAMPLE_PAGES: u32 = 4;

/// Keyword search, aggregated to one 50-item application page.
///
/// A blank query is a defined no-op, not an error. One failing provider page
/// fails the whole call; partial pages are never returned.
pub async fn search_movies(
    api: &dyn MovieApi,
    query: &str,
    app_page: u32,
) -> Result<SearchResultPage, TmdbError> {
    if query.trim().is_empty() {
        return Ok(SearchResultPage::empty());
    }
    let app_page = app_page.max(1);

    let totals = api.search_page(query, 1).await?;
    let total_results = totals.total_results;
    let provider_total = totals.total_pages.max(1).min(PROVIDER_PAGE_CAP);
    let app_total_pages = ((total_results + APP_PAGE_SIZE as u64 - 1) / APP_PAGE_SIZE as u64)
        .max(1) as u32;

    let start = (app_page as u64 - 1) * PROVIDER_SPAN as u64 + 1;
    if start > provider_total as u64 {
        // Out of range, not an error: keep the computed totals.
        return Ok(SearchResultPage {
            results: Vec::new(),
            app_page,
            app_total_pages,
            total_results,
        });
    }
    let start = start as u32;
    let last = provider_total.min(start + PROVIDER_SPAN - 1);

    let chunks = try_join_all((start..=last).map(|p| api.search_page(query, p))).await?;

    let mut results = dedupe_by_id(chunks.into_iter().flat_map(|c| c.results));
    results.sort_by(|a, b| {
        b.popularity
            .partial_cmp(&a.popularity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.vote_count.cmp(&a.vote_count))
    });
    results.truncate(APP_PAGE_SIZE);

    Ok(SearchResultPage {
        results,
        app_page,
        app_total_pages,
        total_results,
    })
}

/// Random sample of up to `count` movies in one genre: 4 distinct provider
/// pages drawn uniformly, merged, shuffled. Intentionally non-deterministic
/// across calls so a "regenerate" action yields a fresh subset.
pub async fn discover_genre_random<R>(
    api: &dyn MovieApi,
    genre_id: i64,
    count: usize,
    rng: &mut R,
) -> Result<Vec<MovieSummary>, TmdbError>
where
    R: Rng + Send,
{
    if genre_id <= 0 {
        return Ok(Vec::new());
    }
    let genre_id = genre_id as u32;

    let totals = api.discover_page(genre_id, 1).await?;
    let total_pages = totals.total_pages.min(PROVIDER_PAGE_CAP);
    if total_pages < 1 {
        return Ok(Vec::new());
    }

    // Rejection-sample distinct pages; duplicates are discarded.
    let want = SAMPLE_PAGES.min(total_pages) as usize;
    let mut pages = HashSet::new();
    while pages.len() < want {
        pages.insert(rng.gen_range(1..=total_pages));
    }

    let chunks = try_join_all(pages.into_iter().map(|p| api.discover_page(genre_id, p))).await?;

    let mut results = dedupe_by_id(chunks.into_iter().flat_map(|c| c.results));
    results.shuffle(rng);
    results.truncate(count);
    Ok(results)
}

fn dedupe_by_id<I>(items: I) -> Vec<MovieSummary>
where
    I: IntoIterator<Item = MovieSummary>,
{
    let mut seen = HashSet::new();
    items.into_iter().filter(|m| seen.insert(m.id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmdb::models::{MovieDetail, ProviderPage};
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Mutex;

    /// Serves synthetic provider pages and records every page requested.
    struct FakeApi {
        total_pages: u32,
        total_results: u64,
        requested: Mutex<Vec<u32>>,
        fail_on_page: Option<u32>,
    }

    impl FakeApi {
        fn new(total_pages: u32, total_results: u64) -> Self {
            Self {
                total_pages,
                total_results,
                requested: Mutex::new(Vec::new()),
                fail_on_page: None,
            }
        }

        fn requested(&self) -> Vec<u32> {
            self.requested.lock().unwrap().clone()
        }

        fn page(&self, page: u32) -> ProviderPage {
            // 20 movies per page; ids overlap across adjacent pages so the
            // dedupe step has real work to do.
            let base = (page as u64 - 1) * 20;
            let results = (base..base + 22)
                .map(|id| MovieSummary {
                    id,
                    title: format!("Movie {id}"),
                    poster_path: None,
                    release_date: None,
                    popularity: (id % 7) as f64,
                    vote_count: id,
                    vote_average: 0.0,
                    overview: String::new(),
                })
                .collect();
            ProviderPage {
                page,
                results,
                total_pages: self.total_pages,
                total_results: self.total_results,
            }
        }
    }

    #[async_trait]
    impl MovieApi for FakeApi {
        async fn search_page(&self, _query: &str, page: u32) -> Result<ProviderPage, TmdbError> {
            self.requested.lock().unwrap().push(page);
            if self.fail_on_page == Some(page) {
                return Err(TmdbError::Upstream {
                    status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    body: "boom".to_string(),
                });
            }
            Ok(self.page(page))
        }

        async fn discover_page(&self, _genre: u32, page: u32) -> Result<ProviderPage, TmdbError> {
            self.search_page("", page).await
        }

        async fn movie_detail(&self, _id: u64) -> Result<MovieDetail, TmdbError> {
            unimplemented!("not used by aggregation tests")
        }
    }

    #[tokio::test]
    async fn blank_query_is_a_no_op() {
        let api = FakeApi::new(10, 200);
        for q in ["", "   ", "\t\n"] {
            let page = search_movies(&api, q, 3).await.unwrap();
            assert!(page.results.is_empty());
            assert_eq!(page.app_page, 1);
            assert_eq!(page.app_total_pages, 1);
            assert_eq!(page.total_results, 0);
        }
        assert!(api.requested().is_empty(), "gateway must not be contacted");
    }

    #[tokio::test]
    async fn app_page_maps_to_three_provider_pages() {
        let api = FakeApi::new(500, 10_000);
        search_movies(&api, "dune", 1).await.unwrap();
        assert_eq!(api.requested(), vec![1, 1, 2, 3]); // totals fetch, then the span

        let api = FakeApi::new(500, 10_000);
        search_movies(&api, "dune", 2).await.unwrap();
        assert_eq!(api.requested(), vec![1, 4, 5, 6]);

        let api = FakeApi::new(500, 10_000);
        search_movies(&api, "dune", 7).await.unwrap();
        assert_eq!(api.requested(), vec![1, 19, 20, 21]);
    }

    #[tokio::test]
    async fn span_is_clipped_to_provider_total() {
        let api = FakeApi::new(5, 95);
        let page = search_movies(&api, "dune", 2).await.unwrap();
        assert_eq!(api.requested(), vec![1, 4, 5]);
        assert!(!page.results.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_page_keeps_totals() {
        let api = FakeApi::new(5, 95);
        let page = search_movies(&api, "dune", 9).await.unwrap();
        assert!(page.results.is_empty());
        assert_eq!(page.app_page, 9);
        assert_eq!(page.app_total_pages, 2); // ceil(95 / 50)
        assert_eq!(page.total_results, 95);
        assert_eq!(api.requested(), vec![1], "only the totals fetch");
    }

    #[tokio::test]
    async fn results_are_deduped_sorted_and_bounded() {
        let api = FakeApi::new(500, 10_000);
        let page = search_movies(&api, "dune", 1).await.unwrap();

        assert!(page.results.len() <= APP_PAGE_SIZE);
        let mut ids = HashSet::new();
        for m in &page.results {
            assert!(ids.insert(m.id), "duplicate id {}", m.id);
        }
        for pair in page.results.windows(2) {
            assert!(pair[0].popularity >= pair[1].popularity);
            if pair[0].popularity == pair[1].popularity {
                assert!(pair[0].vote_count >= pair[1].vote_count);
            }
        }
    }

    #[tokio::test]
    async fn totals_cap_at_provider_limit() {
        let api = FakeApi::new(800, 16_000);
        // App page 167 starts at provider page 499: still in range under the cap.
        search_movies(&api, "dune", 167).await.unwrap();
        assert_eq!(api.requested(), vec![1, 499, 500]);

        // App page 168 would start at 502: beyond the cap even though the
        // provider claims more pages exist.
        let api = FakeApi::new(800, 16_000);
        let page = search_movies(&api, "dune", 168).await.unwrap();
        assert!(page.results.is_empty());
        assert_eq!(api.requested(), vec![1]);
    }

    #[tokio::test]
    async fn one_failing_fetch_fails_the_aggregation() {
        let mut api = FakeApi::new(500, 10_000);
        api.fail_on_page = Some(2);
        let err = search_movies(&api, "dune", 1).await.unwrap_err();
        assert!(matches!(err, TmdbError::Upstream { .. }));
    }

    #[tokio::test]
    async fn invalid_genre_is_a_no_op() {
        let api = FakeApi::new(10, 200);
        let mut rng = StdRng::seed_from_u64(7);
        for genre in [0, -3] {
            let out = discover_genre_random(&api, genre, 50, &mut rng)
                .await
                .unwrap();
            assert!(out.is_empty());
        }
        assert!(api.requested().is_empty());
    }

    #[tokio::test]
    async fn genre_sample_is_bounded_and_unique() {
        let api = FakeApi::new(200, 4_000);
        let mut rng = StdRng::seed_from_u64(42);
        let out = discover_genre_random(&api, 28, 50, &mut rng).await.unwrap();

        assert!(out.len() <= 50);
        let mut ids = HashSet::new();
        for m in &out {
            assert!(ids.insert(m.id));
        }
        // Totals fetch plus 4 distinct sampled pages.
        let requested = api.requested();
        assert_eq!(requested.len(), 5);
        let sampled: HashSet<_> = requested[1..].iter().copied().collect();
        assert_eq!(sampled.len(), 4);
        assert!(sampled.iter().all(|p| (1..=200).contains(p)));
    }

    #[tokio::test]
    async fn genre_sample_clips_to_small_providers() {
        let api = FakeApi::new(2, 30);
        let mut rng = StdRng::seed_from_u64(1);
        let out = discover_genre_random(&api, 18, 50, &mut rng).await.unwrap();
        assert!(!out.is_empty());

        let requested = api.requested();
        let sampled: HashSet<_> = requested[1..].iter().copied().collect();
        assert_eq!(sampled, HashSet::from([1, 2]));
    }

    #[tokio::test]
    async fn genre_count_truncates() {
        let api = FakeApi::new(200, 4_000);
        let mut rng = StdRng::seed_from_u64(3);
        let out = discover_genre_random(&api, 28, 10, &mut rng).await.unwrap();
        assert_eq!(out.len(), 10);
    }

    #[tokio::test]
    async fn genre_failure_propagates() {
        let mut api = FakeApi::new(200, 4_000);
        api.fail_on_page = Some(1); // totals fetch itself
        let mut rng = StdRng::seed_from_u64(9);
        let err = discover_genre_random(&api, 28, 50, &mut rng)
            .await
            .unwrap_err();
        assert!(matches!(err, TmdbError::Upstream { .. }));
    }
}
