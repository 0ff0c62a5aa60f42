use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::cached;
use crate::db::{CacheKey, ResultCache};
use crate::error::AppResult;
use crate::models::{Strategy, WorkCandidate};
use crate::repo::WorkRepository;
use crate::services::quality::QualityScoreEngine;

/// Per-strategy source limits
const PERSONALIZED_FOLLOWED_LIMIT: usize = 30;
const PERSONALIZED_MATCHED_LIMIT: usize = 50;
const ADAPTIVE_FOLLOWED_LIMIT: usize = 20;
const ADAPTIVE_MATCHED_LIMIT: usize = 30;
const ADAPTIVE_POPULAR_LIMIT: usize = 20;
const POPULAR_POPULAR_LIMIT: usize = 30;
const POPULAR_NEW_LIMIT: usize = 20;

/// Share of the quality-new quota reserved for CTR-validated works
const CTR_VALIDATED_SHARE: f64 = 0.7;

/// Raw candidate pool plus the author ids seen in the followed-authors
/// source, which downstream scoring uses as the reader's followed set.
#[derive(Debug, Default)]
pub struct AggregatedCandidates {
    /// Flat list in fixed source precedence: followed authors, then
    /// category/tag matches, then popular/new. Duplicates allowed.
    pub candidates: Vec<WorkCandidate>,
    pub followed_author_ids: HashSet<Uuid>,
}

/// Fans out to the strategy's candidate sources concurrently and merges
/// their output. A failed source contributes an empty list, never an error.
pub struct CandidateAggregator {
    repo: Arc<dyn WorkRepository>,
    cache: Arc<dyn ResultCache>,
    quality: Arc<QualityScoreEngine>,
    popular_cache_ttl: u64,
    quality_new_cache_ttl: u64,
}

impl CandidateAggregator {
    pub fn new(
        repo: Arc<dyn WorkRepository>,
        cache: Arc<dyn ResultCache>,
        quality: Arc<QualityScoreEngine>,
        popular_cache_ttl: u64,
        quality_new_cache_ttl: u64,
    ) -> Self {
        Self {
            repo,
            cache,
            quality,
            popular_cache_ttl,
            quality_new_cache_ttl,
        }
    }

    pub async fn aggregate(&self, reader_id: Uuid, strategy: Strategy) -> AggregatedCandidates {
        match strategy {
            Strategy::Personalized => {
                let (followed, matched) = tokio::join!(
                    self.repo
                        .fetch_followed_authors_works(reader_id, PERSONALIZED_FOLLOWED_LIMIT),
                    self.repo
                        .fetch_category_tag_matched_works(reader_id, PERSONALIZED_MATCHED_LIMIT),
                );
                let followed = or_empty(followed, "followed_authors");
                let matched = or_empty(matched, "category_tag_matched");
                merge(followed, vec![matched])
            }
            Strategy::Adaptive => {
                let (followed, matched, popular) = tokio::join!(
                    self.repo
                        .fetch_followed_authors_works(reader_id, ADAPTIVE_FOLLOWED_LIMIT),
                    self.repo
                        .fetch_category_tag_matched_works(reader_id, ADAPTIVE_MATCHED_LIMIT),
                    self.popular_works(ADAPTIVE_POPULAR_LIMIT),
                );
                let followed = or_empty(followed, "followed_authors");
                let matched = or_empty(matched, "category_tag_matched");
                merge(followed, vec![matched, popular])
            }
            Strategy::Popular => self.aggregate_popular().await,
        }
    }

    /// The reader-independent popular pool, also used for guests
    pub async fn aggregate_popular(&self) -> AggregatedCandidates {
        let (popular, fresh) = tokio::join!(
            self.popular_works(POPULAR_POPULAR_LIMIT),
            self.quality_new_works(POPULAR_NEW_LIMIT),
        );
        merge(Vec::new(), vec![popular, fresh])
    }

    /// Globally-popular works, cached whole
    pub async fn popular_works(&self, limit: usize) -> Vec<WorkCandidate> {
        cached!(
            self.cache.as_ref(),
            CacheKey::PopularWorks { limit },
            self.popular_cache_ttl,
            or_empty(self.repo.fetch_popular_works(limit).await, "popular_works")
        )
    }

    /// Quality-filtered new works, cached whole.
    ///
    /// The repository supplies the raw 14-day window at twice the quota; the
    /// quota is then filled 70% from CTR-validated works ordered by quality
    /// and 30% from basic-stats-only works, topping up across the split when
    /// either side runs short.
    async fn quality_new_works(&self, limit: usize) -> Vec<WorkCandidate> {
        cached!(
            self.cache.as_ref(),
            CacheKey::QualityNewWorks { limit },
            self.quality_new_cache_ttl,
            {
                let raw = or_empty(
                    self.repo.fetch_quality_new_works(limit * 2).await,
                    "quality_new_works",
                );
                self.filter_new_works(raw, limit).await
            }
        )
    }

    async fn filter_new_works(
        &self,
        raw: Vec<WorkCandidate>,
        limit: usize,
    ) -> Vec<WorkCandidate> {
        if raw.is_empty() {
            return raw;
        }

        let scores = self.quality.score_works(&raw).await;

        let (mut validated, mut basic): (Vec<WorkCandidate>, Vec<WorkCandidate>) =
            raw.into_iter().partition(|c| {
                // A vetted work has had its CTR terms computed; the degraded
                // batch (all defaults) routes everything to the basic side
                scores
                    .get(&c.work_id)
                    .map(|s| s.ctr_score > 0.0 || s.engagement_score > 0.0)
                    .unwrap_or(false)
            });

        validated.sort_by(|a, b| {
            let qa = scores.get(&a.work_id).map(|s| s.overall_quality_score);
            let qb = scores.get(&b.work_id).map(|s| s.overall_quality_score);
            qb.partial_cmp(&qa).unwrap_or(std::cmp::Ordering::Equal)
        });
        basic.sort_by(|a, b| b.likes.cmp(&a.likes).then(b.views.cmp(&a.views)));

        let validated_quota =
            ((limit as f64 * CTR_VALIDATED_SHARE).floor() as usize).min(validated.len());
        let mut selected: Vec<WorkCandidate> = validated.drain(..validated_quota).collect();

        let basic_quota = (limit - selected.len()).min(basic.len());
        selected.extend(basic.drain(..basic_quota));

        // Top up from leftover validated works if the basic side ran short
        if selected.len() < limit {
            let top_up = (limit - selected.len()).min(validated.len());
            selected.extend(validated.drain(..top_up));
        }

        selected
    }
}

/// Collapses a failed source into an empty contribution
fn or_empty(result: AppResult<Vec<WorkCandidate>>, source: &str) -> Vec<WorkCandidate> {
    match result {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::warn!(source, error = %e, "Candidate source failed, contributing nothing");
            Vec::new()
        }
    }
}

/// Concatenates source outputs in precedence order, followed-authors first.
/// The followed source's author ids double as the reader's followed set for
/// scoring.
fn merge(followed: Vec<WorkCandidate>, rest: Vec<Vec<WorkCandidate>>) -> AggregatedCandidates {
    let followed_author_ids = followed.iter().map(|c| c.user_id).collect();
    let mut candidates = followed;
    candidates.extend(rest.into_iter().flatten());

    AggregatedCandidates {
        candidates,
        followed_author_ids,
    }
}
