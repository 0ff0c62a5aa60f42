use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{UserPreferenceProfile, WorkCandidate};
use crate::services::round2;

/// A work counts as fresh for this long
const FRESHNESS_WINDOW_DAYS: i64 = 7;

/// Affinity bonuses on top of the base engagement term
const CATEGORY_MATCH_BONUS: f64 = 2.0;
const TAG_MATCH_BONUS: f64 = 1.5;
const FRESHNESS_BONUS: f64 = 1.0;
const FOLLOWED_AUTHOR_BONUS: f64 = 1.0;

/// View/like/comment counts frozen at scoring time
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
}

impl StatsSnapshot {
    pub fn of(work: &WorkCandidate) -> Self {
        Self {
            views: work.views,
            likes: work.likes,
            comments: work.comments,
        }
    }
}

/// Outcome of scoring one work against one reader. The flags feed
/// diagnostics only; the bonuses above are the full extent of their effect
/// on the score.
#[derive(Debug, Clone, Copy)]
pub struct BehaviorAssessment {
    pub score: f64,
    pub is_followed_author: bool,
    pub is_category_match: bool,
    pub is_tag_match: bool,
    pub is_new_work: bool,
}

/// Computes the reader-specific affinity score for a work: a popularity
/// baseline from the snapshot stats plus flat bonuses for profile matches,
/// freshness, and followed authors. Clamped to [0, 10].
pub fn assess(
    work: &WorkCandidate,
    snapshot: StatsSnapshot,
    profile: &UserPreferenceProfile,
    followed_authors: &HashSet<Uuid>,
    now: DateTime<Utc>,
) -> BehaviorAssessment {
    let base = (snapshot.views as f64 / 1000.0).min(10.0) * 0.3
        + (snapshot.likes as f64 / 100.0).min(10.0) * 0.5
        + (snapshot.comments as f64 / 20.0).min(10.0) * 0.2;

    let is_category_match = profile.has_category(&work.category);
    let is_tag_match = profile.has_any_tag(&work.tags);
    let is_new_work = now - work.created_at <= Duration::days(FRESHNESS_WINDOW_DAYS);
    let is_followed_author = followed_authors.contains(&work.user_id);

    let mut score = base;
    if is_category_match {
        score += CATEGORY_MATCH_BONUS;
    }
    if is_tag_match {
        score += TAG_MATCH_BONUS;
    }
    if is_new_work {
        score += FRESHNESS_BONUS;
    }
    if is_followed_author {
        score += FOLLOWED_AUTHOR_BONUS;
    }

    BehaviorAssessment {
        score: round2(score.clamp(0.0, 10.0)),
        is_followed_author,
        is_category_match,
        is_tag_match,
        is_new_work,
    }
}
