use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::models::{ScoredWork, UserPreferenceProfile, WorkCandidate};
use crate::services::behavior::{self, StatsSnapshot};
use crate::services::quality::QualityScoreEngine;
use crate::services::round2;

/// Deduplicates a raw candidate pool, scores it, and sorts it.
///
/// Source order matters: sources are concatenated in fixed precedence
/// (followed authors, then category/tag matches, then popular/new), and the
/// first occurrence of a work id wins on duplicates.
pub struct Ranker {
    quality: Arc<QualityScoreEngine>,
    quality_weight: f64,
    behavior_weight: f64,
    /// Above this pool size, skip quality scoring for a cheap stats sort
    lightweight_threshold: usize,
}

impl Ranker {
    pub fn new(
        quality: Arc<QualityScoreEngine>,
        quality_weight: f64,
        behavior_weight: f64,
        lightweight_threshold: usize,
    ) -> Self {
        Self {
            quality,
            quality_weight,
            behavior_weight,
            lightweight_threshold,
        }
    }

    pub async fn rank(
        &self,
        candidates: Vec<WorkCandidate>,
        profile: &UserPreferenceProfile,
        followed_authors: &HashSet<Uuid>,
    ) -> Vec<ScoredWork> {
        let deduped = dedup_first_occurrence(candidates);

        if deduped.len() > self.lightweight_threshold {
            tracing::debug!(
                pool_size = deduped.len(),
                threshold = self.lightweight_threshold,
                "Large candidate pool, using lightweight ordering"
            );
            return lightweight_rank(deduped);
        }

        let quality_scores = self.quality.score_works(&deduped).await;
        let now = Utc::now();

        let mut scored: Vec<ScoredWork> = deduped
            .into_iter()
            .map(|work| {
                let snapshot = StatsSnapshot::of(&work);
                let quality_score = quality_scores
                    .get(&work.work_id)
                    .map(|c| c.overall_quality_score)
                    .unwrap_or_default();
                let assessment = behavior::assess(&work, snapshot, profile, followed_authors, now);

                let recommendation_score = round2(
                    quality_score * self.quality_weight + assessment.score * self.behavior_weight,
                );

                ScoredWork {
                    work,
                    quality_score,
                    user_behavior_score: assessment.score,
                    recommendation_score,
                    snapshot_views: snapshot.views,
                    snapshot_likes: snapshot.likes,
                    snapshot_comments: snapshot.comments,
                    is_followed_author: assessment.is_followed_author,
                    is_category_match: assessment.is_category_match,
                    is_tag_match: assessment.is_tag_match,
                    is_new_work: assessment.is_new_work,
                }
            })
            .collect();

        // Stable sort: ties keep their source-precedence order
        scored.sort_by(|a, b| b.recommendation_score.total_cmp(&a.recommendation_score));
        scored
    }
}

/// Keeps the first occurrence of each work id, in input order
fn dedup_first_occurrence(candidates: Vec<WorkCandidate>) -> Vec<WorkCandidate> {
    let mut seen: HashSet<Uuid> = HashSet::with_capacity(candidates.len());
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.work_id))
        .collect()
}

/// Cheap ordering for oversized pools and fallback pages: trend, then
/// likes, then views
pub(crate) fn lightweight_rank(candidates: Vec<WorkCandidate>) -> Vec<ScoredWork> {
    let mut scored: Vec<ScoredWork> = candidates.into_iter().map(ScoredWork::unscored).collect();
    scored.sort_by(|a, b| {
        b.work
            .trend_score
            .total_cmp(&a.work.trend_score)
            .then(b.snapshot_likes.cmp(&a.snapshot_likes))
            .then(b.snapshot_views.cmp(&a.snapshot_views))
    });
    scored
}
