use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::db::{CacheKey, ResultCache};
use crate::models::{CtrStats, QualityScoreComponents, WorkCandidate};
use crate::repo::WorkRepository;
use crate::services::round2;

/// Below this many impressions CTR and engagement are not trusted: both
/// contribute 0 and the remaining weights are not rescaled, so an unvetted
/// work cannot reach a high quality score from CTR alone.
pub const MIN_IMPRESSIONS_FOR_CTR: i64 = 20;

/// CTR at or above this is a perfect 10
const CTR_CEILING: f64 = 0.15;

/// Score every candidate gets when the telemetry batch is entirely
/// unavailable
const DEGRADED_QUALITY_SCORE: f64 = 5.0;

/// Component weights for the overall quality score
const CTR_WEIGHT: f64 = 0.4;
const ENGAGEMENT_WEIGHT: f64 = 0.3;
const CONTENT_WEIGHT: f64 = 0.2;
const CONSISTENCY_WEIGHT: f64 = 0.1;

impl QualityScoreComponents {
    /// Components reported when telemetry could not be fetched at all
    fn degraded(consistency_score: f64) -> Self {
        Self {
            ctr_score: 0.0,
            engagement_score: 0.0,
            content_quality_score: 0.0,
            consistency_score,
            overall_quality_score: DEGRADED_QUALITY_SCORE,
        }
    }
}

/// Converts engagement telemetry and content attributes into a 0-10 quality
/// score per work, reader-independent. Batch results are cached by the
/// work-id set.
pub struct QualityScoreEngine {
    repo: Arc<dyn WorkRepository>,
    cache: Arc<dyn ResultCache>,
    /// Placeholder for a future similarity signal; only the value is
    /// pluggable
    consistency_score: f64,
    cache_ttl: u64,
}

impl QualityScoreEngine {
    pub fn new(
        repo: Arc<dyn WorkRepository>,
        cache: Arc<dyn ResultCache>,
        consistency_score: f64,
        cache_ttl: u64,
    ) -> Self {
        Self {
            repo,
            cache,
            consistency_score,
            cache_ttl,
        }
    }

    /// Scores a batch of candidates.
    ///
    /// Per-item degradation: a work without telemetry scores on content
    /// alone. Whole-batch degradation: if the telemetry fetch fails, every
    /// work gets the default 5.0 and the degraded batch is not cached.
    pub async fn score_works(
        &self,
        candidates: &[WorkCandidate],
    ) -> HashMap<Uuid, QualityScoreComponents> {
        if candidates.is_empty() {
            return HashMap::new();
        }

        let work_ids: Vec<Uuid> = candidates.iter().map(|c| c.work_id).collect();
        let key = CacheKey::quality_scores(&work_ids);

        if let Some(cached) = crate::db::get_cached(self.cache.as_ref(), &key).await {
            return cached;
        }

        let ctr_stats = match self.repo.fetch_ctr_stats(&work_ids).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    work_count = candidates.len(),
                    "CTR telemetry fetch failed, degrading quality scores to default"
                );
                return candidates
                    .iter()
                    .map(|c| {
                        (
                            c.work_id,
                            QualityScoreComponents::degraded(self.consistency_score),
                        )
                    })
                    .collect();
            }
        };

        let scores: HashMap<Uuid, QualityScoreComponents> = candidates
            .iter()
            .map(|candidate| {
                // Missing telemetry is not an error: treat as zero
                // impressions and fall back to the content-only estimate
                let stats = ctr_stats
                    .get(&candidate.work_id)
                    .copied()
                    .unwrap_or_default();
                (candidate.work_id, self.score_one(candidate, &stats))
            })
            .collect();

        crate::db::put_cached(self.cache.as_ref(), &key, &scores, self.cache_ttl);

        scores
    }

    fn score_one(&self, candidate: &WorkCandidate, stats: &CtrStats) -> QualityScoreComponents {
        let vetted = stats.impression_count >= MIN_IMPRESSIONS_FOR_CTR;
        let ctr_score = if vetted { ctr_score(stats.ctr_unique) } else { 0.0 };
        let engagement_score = if vetted { engagement_score(stats) } else { 0.0 };
        let content_quality_score = content_quality_score(candidate);

        let overall_quality_score = round2(
            ctr_score * CTR_WEIGHT
                + engagement_score * ENGAGEMENT_WEIGHT
                + content_quality_score * CONTENT_WEIGHT
                + self.consistency_score * CONSISTENCY_WEIGHT,
        );

        QualityScoreComponents {
            ctr_score,
            engagement_score,
            content_quality_score,
            consistency_score: self.consistency_score,
            overall_quality_score,
        }
    }
}

/// Log-scaled CTR curve: marginal value of CTR improvement decreases as CTR
/// rises, saturating at 10 once CTR reaches the ceiling.
fn ctr_score(ctr_unique: f64) -> f64 {
    if ctr_unique <= 0.0 {
        return 0.0;
    }
    if ctr_unique >= CTR_CEILING {
        return 10.0;
    }
    let curved = (ctr_unique * 100.0 + 1.0).log10() / 16f64.log10() * 10.0;
    curved.clamp(0.0, 10.0)
}

/// Tiered engagement buckets: display duration (up to 4), intersection ratio
/// (up to 3), impression volume (up to 3). Capped at 10.
fn engagement_score(stats: &CtrStats) -> f64 {
    let duration: f64 = match stats.avg_display_duration {
        d if d >= 5.0 => 4.0,
        d if d >= 3.0 => 3.0,
        d if d >= 2.0 => 2.0,
        d if d >= 1.0 => 1.0,
        _ => 0.0,
    };

    let intersection: f64 = match stats.avg_intersection_ratio {
        r if r >= 0.9 => 3.0,
        r if r >= 0.7 => 2.0,
        r if r >= 0.5 => 1.0,
        _ => 0.0,
    };

    let impressions: f64 = match stats.impression_count {
        n if n >= 1000 => 3.0,
        n if n >= 500 => 2.5,
        n if n >= 100 => 2.0,
        n if n >= 50 => 1.0,
        _ => 0.0,
    };

    (duration + intersection + impressions).min(10.0)
}

/// Additive content score from length, cover image, title, and description.
/// Capped at 10.
fn content_quality_score(candidate: &WorkCandidate) -> f64 {
    let length: f64 = match candidate.content_length {
        n if n >= 2000 => 4.0,
        n if n >= 1000 => 3.0,
        n if n >= 500 => 2.0,
        n if n > 10 => 1.0,
        _ => 0.1,
    };

    let image = if candidate.has_cover_image { 3.0 } else { 1.0 };

    let title_len = candidate.title.chars().count();
    let title = if (10..=50).contains(&title_len) {
        1.5
    } else if title_len > 0 {
        0.5
    } else {
        0.0
    };

    let description_len = candidate.description.chars().count();
    let description = if description_len >= 20 {
        1.5
    } else if description_len > 0 {
        0.5
    } else {
        0.0
    };

    (length + image + title + description).min(10.0)
}
