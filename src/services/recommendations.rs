use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::cached;
use crate::config::EngineConfig;
use crate::db::{self, CacheKey, ResultCache};
use crate::error::{AppError, AppResult};
use crate::models::{
    LoadMoreResponse, RecommendationResult, ScoredWork, Strategy, UserPreferenceProfile,
};
use crate::repo::WorkRepository;
use crate::services::aggregator::CandidateAggregator;
use crate::services::blender::DiversityBlender;
use crate::services::quality::QualityScoreEngine;
use crate::services::ranker::{self, Ranker};
use crate::services::{filter, strategy};

/// Size of the shared ranked pool cached for guests. The popular pipeline's
/// own source limits bound the pool; this only names the cache entry.
const GUEST_POOL_SIZE: usize = 50;

/// Top-level recommendation pipeline.
///
/// Strategy selection, aggregation, filtering, ranking, and blending all
/// degrade locally (empty source, default score, empty profile). The only
/// error a caller can see is `RecommendationsUnavailable`, after even the
/// popularity fallback comes up empty.
pub struct RecommendationService {
    repo: Arc<dyn WorkRepository>,
    cache: Arc<dyn ResultCache>,
    aggregator: CandidateAggregator,
    ranker: Ranker,
    blender: DiversityBlender,
    engine: EngineConfig,
}

impl RecommendationService {
    pub fn new(
        repo: Arc<dyn WorkRepository>,
        cache: Arc<dyn ResultCache>,
        engine: EngineConfig,
    ) -> Self {
        let quality = Arc::new(QualityScoreEngine::new(
            repo.clone(),
            cache.clone(),
            engine.consistency_score,
            engine.quality_cache_ttl,
        ));
        let aggregator = CandidateAggregator::new(
            repo.clone(),
            cache.clone(),
            quality.clone(),
            engine.popular_cache_ttl,
            engine.quality_new_cache_ttl,
        );
        let ranker = Ranker::new(
            quality,
            engine.quality_weight,
            engine.behavior_weight,
            engine.lightweight_threshold,
        );
        let blender = DiversityBlender::new(
            repo.clone(),
            engine.challenge_divisor,
            engine.challenge_interval,
            engine.default_page_size,
        );

        Self {
            repo,
            cache,
            aggregator,
            ranker,
            blender,
            engine,
        }
    }

    /// Serves one page of recommendations
    pub async fn get_recommendations(
        &self,
        reader_id: Option<Uuid>,
        exclude: &[Uuid],
        target_count: usize,
    ) -> AppResult<RecommendationResult> {
        if target_count == 0 {
            return Err(AppError::InvalidInput(
                "target_count must be at least 1".to_string(),
            ));
        }

        let excluded: HashSet<Uuid> = exclude.iter().copied().collect();

        let Some(reader_id) = reader_id else {
            return Ok(self.guest_recommendations(&excluded, target_count).await);
        };

        match self
            .assemble_for_reader(reader_id, &excluded, target_count)
            .await
        {
            Ok(result) => {
                tracing::info!(
                    reader_id = %reader_id,
                    strategy = %result.strategy,
                    total = result.total,
                    "Recommendations assembled"
                );
                Ok(result)
            }
            Err(e) => {
                tracing::error!(
                    reader_id = %reader_id,
                    error = %e,
                    "Recommendation pipeline failed, serving popularity fallback"
                );
                self.popularity_fallback(target_count).await
            }
        }
    }

    /// Serves an incremental "load more" page. An empty page means the feed
    /// is exhausted and the client should stop asking.
    pub async fn get_more_recommendations(
        &self,
        reader_id: Option<Uuid>,
        exclude: &[Uuid],
        offset: usize,
    ) -> AppResult<LoadMoreResponse> {
        let page_size = self.engine.default_page_size;
        let excluded: HashSet<Uuid> = exclude.iter().copied().collect();

        let ranked = match reader_id {
            Some(reader_id) => self.reader_pool(reader_id, &excluded).await.0,
            None => without_excluded(self.guest_pool().await, &excluded),
        };

        // The exclusion list already covers the works the client has shown,
        // so the offset only skips whatever that list missed
        let skip = offset.saturating_sub(exclude.len());
        let remaining = ranked.len().saturating_sub(skip);
        let works: Vec<ScoredWork> = ranked.into_iter().skip(skip).take(page_size).collect();
        let has_more = !works.is_empty() && remaining > page_size;

        Ok(LoadMoreResponse { works, has_more })
    }

    /// Full pipeline for a logged-in reader
    async fn assemble_for_reader(
        &self,
        reader_id: Uuid,
        excluded: &HashSet<Uuid>,
        target_count: usize,
    ) -> AppResult<RecommendationResult> {
        let (ranked, strategy, profile) = self.reader_pool(reader_id, excluded).await;
        let works = self
            .blender
            .blend(reader_id, &profile, ranked, target_count)
            .await;

        Ok(page(works, strategy, target_count))
    }

    /// Aggregates, filters, and ranks the full candidate pool for a reader
    async fn reader_pool(
        &self,
        reader_id: Uuid,
        excluded: &HashSet<Uuid>,
    ) -> (Vec<ScoredWork>, Strategy, UserPreferenceProfile) {
        let (behavior, preference) = tokio::join!(
            self.repo.fetch_user_behavior_profile(reader_id),
            self.repo.fetch_user_preference_profile(reader_id),
        );

        let strategy = match behavior {
            Ok(profile) => strategy::select_strategy(profile.total_actions()),
            Err(e) => {
                tracing::warn!(
                    reader_id = %reader_id,
                    error = %e,
                    "Behavior profile unavailable, defaulting to popular strategy"
                );
                Strategy::Popular
            }
        };

        let profile = match preference {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(
                    reader_id = %reader_id,
                    error = %e,
                    "Preference profile unavailable, using empty profile"
                );
                UserPreferenceProfile::default()
            }
        };

        let aggregated = self.aggregator.aggregate(reader_id, strategy).await;
        let candidates = without_excluded(aggregated.candidates, excluded);
        let candidates =
            filter::exclude_in_progress(self.repo.as_ref(), reader_id, candidates).await;

        let ranked = self
            .ranker
            .rank(candidates, &profile, &aggregated.followed_author_ids)
            .await;

        (ranked, strategy, profile)
    }

    /// Guest pipeline: always popular, served from a shared cached pool,
    /// never touching the per-reader profile fetchers
    async fn guest_recommendations(
        &self,
        excluded: &HashSet<Uuid>,
        target_count: usize,
    ) -> RecommendationResult {
        let pool = without_excluded(self.guest_pool().await, excluded);
        page(pool, Strategy::Popular, target_count)
    }

    async fn guest_pool(&self) -> Vec<ScoredWork> {
        cached!(
            self.cache.as_ref(),
            CacheKey::GuestRecommendations {
                limit: GUEST_POOL_SIZE,
            },
            self.engine.guest_cache_ttl,
            {
                let aggregated = self.aggregator.aggregate_popular().await;
                self.ranker
                    .rank(
                        aggregated.candidates,
                        &UserPreferenceProfile::default(),
                        &HashSet::new(),
                    )
                    .await
            }
        )
    }

    /// Last line of defense: a lightweight-ranked popular page. An empty
    /// page is never cached, so recovery is picked up immediately.
    async fn popularity_fallback(&self, target_count: usize) -> AppResult<RecommendationResult> {
        let key = CacheKey::PopularityFallback {
            limit: target_count,
        };

        let works: Vec<ScoredWork> = match db::get_cached(self.cache.as_ref(), &key).await {
            Some(works) => works,
            None => {
                let works = match self.repo.fetch_popular_works(target_count).await {
                    Ok(candidates) => ranker::lightweight_rank(candidates),
                    Err(e) => {
                        tracing::error!(error = %e, "Popularity fallback fetch failed");
                        Vec::new()
                    }
                };
                if !works.is_empty() {
                    db::put_cached(
                        self.cache.as_ref(),
                        &key,
                        &works,
                        self.engine.fallback_cache_ttl,
                    );
                }
                works
            }
        };

        if works.is_empty() {
            return Err(AppError::RecommendationsUnavailable);
        }

        Ok(page(works, Strategy::Popular, target_count))
    }
}

fn without_excluded<T: HasWorkId>(works: Vec<T>, excluded: &HashSet<Uuid>) -> Vec<T> {
    if excluded.is_empty() {
        return works;
    }
    works
        .into_iter()
        .filter(|w| !excluded.contains(&w.work_id()))
        .collect()
}

trait HasWorkId {
    fn work_id(&self) -> Uuid;
}

impl HasWorkId for ScoredWork {
    fn work_id(&self) -> Uuid {
        self.work.work_id
    }
}

impl HasWorkId for crate::models::WorkCandidate {
    fn work_id(&self) -> Uuid {
        self.work_id
    }
}

fn page(
    mut works: Vec<ScoredWork>,
    strategy: Strategy,
    target_count: usize,
) -> RecommendationResult {
    works.truncate(target_count);
    let total = works.len();
    RecommendationResult {
        works,
        strategy,
        source: strategy.source_label().to_string(),
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryCache;
    use crate::models::{CtrStats, UserBehaviorProfile, WorkCandidate};
    use crate::repo::MockWorkRepository;
    use chrono::Utc;
    use std::collections::HashMap;

    fn candidate(title: &str, likes: i64) -> WorkCandidate {
        WorkCandidate {
            work_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: title.to_string(),
            description: "A description with more than twenty characters.".to_string(),
            category: "fantasy".to_string(),
            tags: vec!["magic".to_string()],
            content_length: 1500,
            has_cover_image: true,
            views: likes * 10,
            likes,
            comments: likes / 5,
            trend_score: likes as f64,
            created_at: Utc::now() - chrono::Duration::days(3),
        }
    }

    fn works(prefix: &str, count: usize) -> Vec<WorkCandidate> {
        (0..count)
            .map(|i| candidate(&format!("{}-{}", prefix, i), (i as i64 + 1) * 17))
            .collect()
    }

    fn service(repo: MockWorkRepository) -> RecommendationService {
        RecommendationService::new(
            Arc::new(repo),
            Arc::new(MemoryCache::new()),
            EngineConfig::default(),
        )
    }

    fn expect_ctr_stats(repo: &mut MockWorkRepository) {
        repo.expect_fetch_ctr_stats().returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| (*id, CtrStats::default()))
                .collect::<HashMap<_, _>>())
        });
    }

    #[tokio::test]
    async fn test_personalized_end_to_end() {
        // 75 actions routes to the personalized strategy
        let mut repo = MockWorkRepository::new();
        repo.expect_fetch_user_behavior_profile().returning(|_| {
            Ok(UserBehaviorProfile {
                likes_count: 75,
                ..Default::default()
            })
        });
        repo.expect_fetch_user_preference_profile()
            .returning(|_| Ok(UserPreferenceProfile::default()));
        repo.expect_fetch_followed_authors_works()
            .returning(|_, _| Ok(works("followed", 3)));
        repo.expect_fetch_category_tag_matched_works()
            .returning(|_, _| Ok(works("matched", 10)));
        repo.expect_fetch_reading_progress()
            .returning(|_| Ok(HashMap::new()));
        expect_ctr_stats(&mut repo);

        let svc = service(repo);
        let result = svc
            .get_recommendations(Some(Uuid::new_v4()), &[], 9)
            .await
            .unwrap();

        assert_eq!(result.strategy, Strategy::Personalized);
        assert_eq!(result.source, "Based on your tastes");
        assert_eq!(result.works.len(), 9);
        assert_eq!(result.total, 9);
        assert!(result
            .works
            .windows(2)
            .all(|w| w[0].recommendation_score >= w[1].recommendation_score));

        let mut ids: Vec<Uuid> = result.works.iter().map(|w| w.work.work_id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), result.works.len());
    }

    #[tokio::test]
    async fn test_guest_request_never_touches_profile_fetchers() {
        // No expectations are registered for the profile fetchers: calling
        // them panics the mock
        let mut repo = MockWorkRepository::new();
        repo.expect_fetch_popular_works()
            .returning(|_| Ok(works("popular", 12)));
        repo.expect_fetch_quality_new_works()
            .returning(|_| Ok(works("new", 4)));
        expect_ctr_stats(&mut repo);

        let svc = service(repo);
        let result = svc.get_recommendations(None, &[], 9).await.unwrap();

        assert_eq!(result.strategy, Strategy::Popular);
        assert_eq!(result.source, "Popular right now");
        assert_eq!(result.works.len(), 9);
    }

    #[tokio::test]
    async fn test_all_sources_empty_is_an_empty_result_not_an_error() {
        let mut repo = MockWorkRepository::new();
        repo.expect_fetch_user_behavior_profile().returning(|_| {
            Ok(UserBehaviorProfile {
                likes_count: 40,
                bookmarks_count: 20,
                ..Default::default()
            })
        });
        repo.expect_fetch_user_preference_profile()
            .returning(|_| Ok(UserPreferenceProfile::default()));
        repo.expect_fetch_followed_authors_works()
            .returning(|_, _| Ok(vec![]));
        repo.expect_fetch_category_tag_matched_works()
            .returning(|_, _| Ok(vec![]));
        repo.expect_fetch_reading_progress()
            .returning(|_| Ok(HashMap::new()));
        expect_ctr_stats(&mut repo);

        let svc = service(repo);
        let result = svc
            .get_recommendations(Some(Uuid::new_v4()), &[], 9)
            .await
            .unwrap();

        assert!(result.works.is_empty());
        assert_eq!(result.total, 0);
    }

    #[tokio::test]
    async fn test_behavior_profile_failure_routes_to_popular() {
        let mut repo = MockWorkRepository::new();
        repo.expect_fetch_user_behavior_profile()
            .returning(|_| Err(AppError::Internal("profile store down".to_string())));
        repo.expect_fetch_user_preference_profile()
            .returning(|_| Ok(UserPreferenceProfile::default()));
        repo.expect_fetch_popular_works()
            .returning(|_| Ok(works("popular", 5)));
        repo.expect_fetch_quality_new_works()
            .returning(|_| Ok(vec![]));
        repo.expect_fetch_reading_progress()
            .returning(|_| Ok(HashMap::new()));
        expect_ctr_stats(&mut repo);

        let svc = service(repo);
        let result = svc
            .get_recommendations(Some(Uuid::new_v4()), &[], 5)
            .await
            .unwrap();

        assert_eq!(result.strategy, Strategy::Popular);
        assert_eq!(result.works.len(), 5);
    }

    #[tokio::test]
    async fn test_exclusions_are_filtered_out() {
        let pool = works("popular", 6);
        let shown = pool[0].work_id;

        let mut repo = MockWorkRepository::new();
        let pool_clone = pool.clone();
        repo.expect_fetch_popular_works()
            .returning(move |_| Ok(pool_clone.clone()));
        repo.expect_fetch_quality_new_works()
            .returning(|_| Ok(vec![]));
        expect_ctr_stats(&mut repo);

        let svc = service(repo);
        let result = svc.get_recommendations(None, &[shown], 9).await.unwrap();

        assert_eq!(result.works.len(), 5);
        assert!(result.works.iter().all(|w| w.work.work_id != shown));
    }

    #[tokio::test]
    async fn test_zero_target_count_is_invalid_input() {
        let repo = MockWorkRepository::new();
        let svc = service(repo);

        let result = svc.get_recommendations(None, &[], 0).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_popularity_fallback_serves_lightweight_page() {
        let mut repo = MockWorkRepository::new();
        repo.expect_fetch_popular_works()
            .returning(|_| Ok(works("popular", 4)));

        let svc = service(repo);
        let result = svc.popularity_fallback(9).await.unwrap();

        assert_eq!(result.strategy, Strategy::Popular);
        assert_eq!(result.works.len(), 4);
        // The lightweight path orders by trend score
        assert!(result
            .works
            .windows(2)
            .all(|w| w[0].work.trend_score >= w[1].work.trend_score));
    }

    #[tokio::test]
    async fn test_fallback_failure_surfaces_unavailable_error() {
        let mut repo = MockWorkRepository::new();
        repo.expect_fetch_popular_works()
            .returning(|_| Err(AppError::Internal("everything is down".to_string())));

        let svc = service(repo);
        let result = svc.popularity_fallback(9).await;

        assert!(matches!(result, Err(AppError::RecommendationsUnavailable)));
    }

    #[tokio::test]
    async fn test_load_more_pages_and_exhausts() {
        let mut repo = MockWorkRepository::new();
        repo.expect_fetch_popular_works()
            .returning(|_| Ok(works("popular", 12)));
        repo.expect_fetch_quality_new_works()
            .returning(|_| Ok(vec![]));
        expect_ctr_stats(&mut repo);

        let svc = service(repo);

        let first = svc.get_more_recommendations(None, &[], 0).await.unwrap();
        assert_eq!(first.works.len(), 9);
        assert!(first.has_more);

        let shown: Vec<Uuid> = first.works.iter().map(|w| w.work.work_id).collect();
        let second = svc
            .get_more_recommendations(None, &shown, shown.len())
            .await
            .unwrap();
        assert_eq!(second.works.len(), 3);
        assert!(!second.has_more);

        let mut all_shown = shown.clone();
        all_shown.extend(second.works.iter().map(|w| w.work.work_id));
        let third = svc
            .get_more_recommendations(None, &all_shown, all_shown.len())
            .await
            .unwrap();
        assert!(third.works.is_empty());
        assert!(!third.has_more);
    }

    #[tokio::test]
    async fn test_guest_pool_is_cached_across_requests() {
        let mut repo = MockWorkRepository::new();
        repo.expect_fetch_popular_works()
            .times(1)
            .returning(|_| Ok(works("popular", 10)));
        repo.expect_fetch_quality_new_works()
            .times(1)
            .returning(|_| Ok(vec![]));
        repo.expect_fetch_ctr_stats().times(1).returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| (*id, CtrStats::default()))
                .collect::<HashMap<_, _>>())
        });

        let svc = service(repo);
        let first = svc.get_recommendations(None, &[], 9).await.unwrap();
        let second = svc.get_recommendations(None, &[], 9).await.unwrap();

        assert_eq!(first, second);
    }
}
