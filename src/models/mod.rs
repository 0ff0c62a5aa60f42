use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Preference profiles keep only the strongest signals
pub const MAX_PREFERRED_CATEGORIES: usize = 5;
pub const MAX_PREFERRED_TAGS: usize = 10;

/// A work plus denormalized stats, as produced by the repository gateway.
///
/// The same `work_id` may appear in several source queries for one request;
/// deduplication happens in the ranker. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkCandidate {
    pub work_id: Uuid,
    /// Author of the work
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub content_length: u32,
    pub has_cover_image: bool,
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub trend_score: f64,
    pub created_at: DateTime<Utc>,
}

/// Impression/click telemetry for one work's surfaced card
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct CtrStats {
    pub impression_count: i64,
    /// Unique clicks / impressions
    pub ctr_unique: f64,
    /// Average fraction of the card visible while on screen
    pub avg_intersection_ratio: f64,
    /// Average on-screen time in seconds
    pub avg_display_duration: f64,
}

/// Per-reader activity counters, used only to derive `total_actions`
/// for strategy selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct UserBehaviorProfile {
    pub likes_count: i64,
    pub bookmarks_count: i64,
    pub views_count: i64,
    pub shares_count: i64,
    pub comments_count: i64,
    pub follows_count: i64,
}

impl UserBehaviorProfile {
    pub fn total_actions(&self) -> i64 {
        self.likes_count
            + self.bookmarks_count
            + self.views_count
            + self.shares_count
            + self.comments_count
            + self.follows_count
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryWeight {
    pub category: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagWeight {
    pub tag: String,
    pub weight: f64,
}

/// Ranked category/tag affinities derived from a trailing 30-day window of
/// reader actions. Weights are non-negative and both lists are sorted
/// descending by weight.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UserPreferenceProfile {
    pub preferred_categories: Vec<CategoryWeight>,
    pub preferred_tags: Vec<TagWeight>,
}

impl UserPreferenceProfile {
    /// Builds a profile from raw weighted signals, enforcing the invariants:
    /// negative weights are dropped, lists are sorted descending, and only
    /// the top 5 categories / top 10 tags are retained.
    pub fn new(mut categories: Vec<CategoryWeight>, mut tags: Vec<TagWeight>) -> Self {
        categories.retain(|c| c.weight >= 0.0);
        tags.retain(|t| t.weight >= 0.0);
        categories.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        tags.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        categories.truncate(MAX_PREFERRED_CATEGORIES);
        tags.truncate(MAX_PREFERRED_TAGS);
        Self {
            preferred_categories: categories,
            preferred_tags: tags,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.preferred_categories.is_empty() && self.preferred_tags.is_empty()
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.preferred_categories
            .iter()
            .any(|c| c.category == category)
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter()
            .any(|t| self.preferred_tags.iter().any(|p| &p.tag == t))
    }

    pub fn category_names(&self) -> Vec<String> {
        self.preferred_categories
            .iter()
            .map(|c| c.category.clone())
            .collect()
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.preferred_tags.iter().map(|t| t.tag.clone()).collect()
    }
}

/// Per-work quality components, each in [0, 10], independent of any reader
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QualityScoreComponents {
    pub ctr_score: f64,
    pub engagement_score: f64,
    pub content_quality_score: f64,
    pub consistency_score: f64,
    /// Weighted sum of the components, rounded to 2 decimals
    pub overall_quality_score: f64,
}

/// A candidate augmented with its scores and stats frozen at scoring time.
///
/// The snapshot fields keep a single response internally consistent even if
/// the underlying counters move while the page is assembled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredWork {
    #[serde(flatten)]
    pub work: WorkCandidate,
    pub quality_score: f64,
    pub user_behavior_score: f64,
    pub recommendation_score: f64,
    pub snapshot_views: i64,
    pub snapshot_likes: i64,
    pub snapshot_comments: i64,
    // Diagnostic flags set by the behavior calculator. Observational only:
    // scoring never reads them back.
    pub is_followed_author: bool,
    pub is_category_match: bool,
    pub is_tag_match: bool,
    pub is_new_work: bool,
}

impl ScoredWork {
    /// Wraps a candidate whose scores were deliberately not computed (the
    /// lightweight large-pool path and challenge insertions). Stats are
    /// still snapshotted so the page stays internally consistent.
    pub fn unscored(work: WorkCandidate) -> Self {
        let (snapshot_views, snapshot_likes, snapshot_comments) =
            (work.views, work.likes, work.comments);
        Self {
            work,
            quality_score: 0.0,
            user_behavior_score: 0.0,
            recommendation_score: 0.0,
            snapshot_views,
            snapshot_likes,
            snapshot_comments,
            is_followed_author: false,
            is_category_match: false,
            is_tag_match: false,
            is_new_work: false,
        }
    }
}

/// Which candidate sources get aggregated for a reader
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Personalized,
    Adaptive,
    Popular,
}

impl Strategy {
    /// Human-facing label explaining where the page came from
    pub fn source_label(&self) -> &'static str {
        match self {
            Strategy::Personalized => "Based on your tastes",
            Strategy::Adaptive => "Picked for you",
            Strategy::Popular => "Popular right now",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Personalized => write!(f, "personalized"),
            Strategy::Adaptive => write!(f, "adaptive"),
            Strategy::Popular => write!(f, "popular"),
        }
    }
}

/// One page of recommendations.
///
/// Invariants: `works` has no duplicate `work_id` and never exceeds the
/// requested target count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationResult {
    pub works: Vec<ScoredWork>,
    pub strategy: Strategy,
    pub source: String,
    pub total: usize,
}

/// Why a challenge candidate is considered discovery material
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeReason {
    NewCategory,
    NewAuthor,
    Trending,
}

/// A deliberately off-profile work inserted for discovery. Disjoint from the
/// reader's interacted-work set by construction (repository-side).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChallengeCandidate {
    #[serde(flatten)]
    pub work: WorkCandidate,
    pub reason: ChallengeReason,
}

/// Incremental page returned by "load more"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadMoreResponse {
    pub works: Vec<ScoredWork>,
    pub has_more: bool,
}

/// Client-facing feed lifecycle, driven purely by server responses.
///
/// An empty "load more" page marks the feed exhausted; callers must stop
/// issuing further requests at that point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Initial,
    HasMore,
    LoadingMore,
    Exhausted,
}

impl FeedState {
    /// Enters the loading state if another page may exist
    pub fn start_loading(self) -> Self {
        match self {
            FeedState::Initial | FeedState::HasMore => FeedState::LoadingMore,
            other => other,
        }
    }

    /// Settles the loading state from a server response
    pub fn apply(self, response: &LoadMoreResponse) -> Self {
        match self {
            FeedState::LoadingMore => {
                if response.works.is_empty() || !response.has_more {
                    FeedState::Exhausted
                } else {
                    FeedState::HasMore
                }
            }
            other => other,
        }
    }

    pub fn can_load_more(self) -> bool {
        matches!(self, FeedState::Initial | FeedState::HasMore)
    }
}
