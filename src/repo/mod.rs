use std::collections::HashMap;

use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    ChallengeCandidate, CtrStats, UserBehaviorProfile, UserPreferenceProfile, WorkCandidate,
};

pub mod postgres;

pub use postgres::{create_pool, PostgresWorkRepository};

/// Repository gateway supplying raw candidate lists and reader telemetry.
///
/// The recommendation engine treats every method here as fallible but never
/// fatal: a gateway error degrades to an empty contribution or a default
/// profile at the call site. Timeouts are the gateway's responsibility.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait WorkRepository: Send + Sync {
    /// Recent works by authors the reader follows
    async fn fetch_followed_authors_works(
        &self,
        reader_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<WorkCandidate>>;

    /// Works matching the reader's preferred categories or tags
    async fn fetch_category_tag_matched_works(
        &self,
        reader_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<WorkCandidate>>;

    /// Globally popular works, reader-independent
    async fn fetch_popular_works(&self, limit: usize) -> AppResult<Vec<WorkCandidate>>;

    /// Works published within the last 14 days, unfiltered; the engine
    /// applies quality filtering on top
    async fn fetch_quality_new_works(&self, limit: usize) -> AppResult<Vec<WorkCandidate>>;

    /// Discovery candidates outside the reader's affinity profile, disjoint
    /// from their interacted-work set
    async fn fetch_challenge_works(
        &self,
        reader_id: Uuid,
        exclude_categories: &[String],
        exclude_tags: &[String],
        limit: usize,
    ) -> AppResult<Vec<ChallengeCandidate>>;

    async fn fetch_user_behavior_profile(&self, reader_id: Uuid)
        -> AppResult<UserBehaviorProfile>;

    async fn fetch_user_preference_profile(
        &self,
        reader_id: Uuid,
    ) -> AppResult<UserPreferenceProfile>;

    /// Reading progress per work, in percent
    async fn fetch_reading_progress(&self, reader_id: Uuid) -> AppResult<HashMap<Uuid, f64>>;

    /// Impression/click telemetry for a batch of works. Works without
    /// telemetry are simply absent from the map.
    async fn fetch_ctr_stats(&self, work_ids: &[Uuid]) -> AppResult<HashMap<Uuid, CtrStats>>;
}
