use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    CategoryWeight, ChallengeCandidate, ChallengeReason, CtrStats, TagWeight, UserBehaviorProfile,
    UserPreferenceProfile, WorkCandidate,
};
use crate::repo::WorkRepository;

/// Preference derivation window and action weights
const PREFERENCE_WINDOW_DAYS: i32 = 30;
const LIKE_WEIGHT: f64 = 10.0;
const BOOKMARK_WEIGHT: f64 = 15.0;
const COMMENT_WEIGHT: f64 = 8.0;
const VIEW_WEIGHT: f64 = 3.0;
const REPEAT_VIEW_BONUS_STEP: f64 = 2.0;
const REPEAT_VIEW_BONUS_CAP: f64 = 6.0;

/// Creates a PostgreSQL connection pool
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// sqlx-backed repository gateway over the platform's works schema
#[derive(Clone)]
pub struct PostgresWorkRepository {
    pool: PgPool,
}

impl PostgresWorkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const CANDIDATE_COLUMNS: &str = "w.id, w.user_id, w.title, w.description, w.category, w.tags, \
     w.content_length, w.has_cover_image, s.views, s.likes, s.comments, s.trend_score, \
     w.created_at";

fn candidate_from_row(row: &sqlx::postgres::PgRow) -> Result<WorkCandidate, sqlx::Error> {
    Ok(WorkCandidate {
        work_id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        tags: row.try_get("tags")?,
        content_length: row.try_get::<i32, _>("content_length")? as u32,
        has_cover_image: row.try_get("has_cover_image")?,
        views: row.try_get("views")?,
        likes: row.try_get("likes")?,
        comments: row.try_get("comments")?,
        trend_score: row.try_get("trend_score")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait::async_trait]
impl WorkRepository for PostgresWorkRepository {
    async fn fetch_followed_authors_works(
        &self,
        reader_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<WorkCandidate>> {
        let sql = format!(
            "SELECT {CANDIDATE_COLUMNS}
             FROM works w
             JOIN work_stats s ON s.work_id = w.id
             JOIN follows f ON f.followee_id = w.user_id
             WHERE f.follower_id = $1 AND w.published
             ORDER BY w.created_at DESC
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(reader_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| candidate_from_row(r).map_err(Into::into))
            .collect()
    }

    async fn fetch_category_tag_matched_works(
        &self,
        reader_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<WorkCandidate>> {
        let profile = self.fetch_user_preference_profile(reader_id).await?;
        if profile.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {CANDIDATE_COLUMNS}
             FROM works w
             JOIN work_stats s ON s.work_id = w.id
             WHERE w.published
               AND w.user_id <> $1
               AND (w.category = ANY($2) OR w.tags && $3)
             ORDER BY s.trend_score DESC, w.created_at DESC
             LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(reader_id)
            .bind(profile.category_names())
            .bind(profile.tag_names())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| candidate_from_row(r).map_err(Into::into))
            .collect()
    }

    async fn fetch_popular_works(&self, limit: usize) -> AppResult<Vec<WorkCandidate>> {
        let sql = format!(
            "SELECT {CANDIDATE_COLUMNS}
             FROM works w
             JOIN work_stats s ON s.work_id = w.id
             WHERE w.published
             ORDER BY s.trend_score DESC, s.likes DESC, s.views DESC
             LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| candidate_from_row(r).map_err(Into::into))
            .collect()
    }

    async fn fetch_quality_new_works(&self, limit: usize) -> AppResult<Vec<WorkCandidate>> {
        let sql = format!(
            "SELECT {CANDIDATE_COLUMNS}
             FROM works w
             JOIN work_stats s ON s.work_id = w.id
             WHERE w.published
               AND w.created_at >= now() - interval '14 days'
             ORDER BY w.created_at DESC
             LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| candidate_from_row(r).map_err(Into::into))
            .collect()
    }

    async fn fetch_challenge_works(
        &self,
        reader_id: Uuid,
        exclude_categories: &[String],
        exclude_tags: &[String],
        limit: usize,
    ) -> AppResult<Vec<ChallengeCandidate>> {
        // Three discovery buckets sharing the limit. Works the reader has
        // already touched (liked, bookmarked, or opened) are excluded in SQL.
        let per_bucket = limit.div_ceil(3).max(1);
        let untouched = "NOT EXISTS (SELECT 1 FROM likes l WHERE l.work_id = w.id AND l.user_id = $1)
               AND NOT EXISTS (SELECT 1 FROM bookmarks b WHERE b.work_id = w.id AND b.user_id = $1)
               AND NOT EXISTS (SELECT 1 FROM view_logs v WHERE v.work_id = w.id AND v.user_id = $1)";

        let new_category_sql = format!(
            "SELECT {CANDIDATE_COLUMNS}
             FROM works w
             JOIN work_stats s ON s.work_id = w.id
             WHERE w.published
               AND NOT (w.category = ANY($2))
               AND NOT (w.tags && $3)
               AND {untouched}
             ORDER BY s.trend_score DESC
             LIMIT $4"
        );
        let new_author_sql = format!(
            "SELECT {CANDIDATE_COLUMNS}
             FROM works w
             JOIN work_stats s ON s.work_id = w.id
             WHERE w.published
               AND w.created_at >= now() - interval '30 days'
               AND NOT EXISTS (SELECT 1 FROM follows f
                               WHERE f.follower_id = $1 AND f.followee_id = w.user_id)
               AND {untouched}
             ORDER BY w.created_at DESC
             LIMIT $2"
        );
        let trending_sql = format!(
            "SELECT {CANDIDATE_COLUMNS}
             FROM works w
             JOIN work_stats s ON s.work_id = w.id
             WHERE w.published
               AND w.created_at >= now() - interval '7 days'
               AND {untouched}
             ORDER BY s.trend_score DESC
             LIMIT $2"
        );

        let new_category_rows = sqlx::query(&new_category_sql)
            .bind(reader_id)
            .bind(exclude_categories)
            .bind(exclude_tags)
            .bind(per_bucket as i64)
            .fetch_all(&self.pool)
            .await?;
        let new_author_rows = sqlx::query(&new_author_sql)
            .bind(reader_id)
            .bind(per_bucket as i64)
            .fetch_all(&self.pool)
            .await?;
        let trending_rows = sqlx::query(&trending_sql)
            .bind(reader_id)
            .bind(per_bucket as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut candidates = Vec::with_capacity(limit);
        for (rows, reason) in [
            (new_category_rows, ChallengeReason::NewCategory),
            (new_author_rows, ChallengeReason::NewAuthor),
            (trending_rows, ChallengeReason::Trending),
        ] {
            for row in &rows {
                candidates.push(ChallengeCandidate {
                    work: candidate_from_row(row)?,
                    reason,
                });
            }
        }
        candidates.truncate(limit);

        Ok(candidates)
    }

    async fn fetch_user_behavior_profile(
        &self,
        reader_id: Uuid,
    ) -> AppResult<UserBehaviorProfile> {
        let row = sqlx::query(
            "SELECT
               (SELECT COUNT(*) FROM likes WHERE user_id = $1) AS likes_count,
               (SELECT COUNT(*) FROM bookmarks WHERE user_id = $1) AS bookmarks_count,
               (SELECT COUNT(*) FROM view_logs WHERE user_id = $1) AS views_count,
               (SELECT COUNT(*) FROM shares WHERE user_id = $1) AS shares_count,
               (SELECT COUNT(*) FROM comments WHERE user_id = $1) AS comments_count,
               (SELECT COUNT(*) FROM follows WHERE follower_id = $1) AS follows_count",
        )
        .bind(reader_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(UserBehaviorProfile {
            likes_count: row.try_get("likes_count")?,
            bookmarks_count: row.try_get("bookmarks_count")?,
            views_count: row.try_get("views_count")?,
            shares_count: row.try_get("shares_count")?,
            comments_count: row.try_get("comments_count")?,
            follows_count: row.try_get("follows_count")?,
        })
    }

    async fn fetch_user_preference_profile(
        &self,
        reader_id: Uuid,
    ) -> AppResult<UserPreferenceProfile> {
        // One row per acted-on work per action kind, with a per-work count so
        // repeat views can earn their bonus.
        let rows = sqlx::query(
            "SELECT w.category, w.tags, a.action, a.times
             FROM (
               SELECT work_id, 'like' AS action, COUNT(*) AS times
               FROM likes WHERE user_id = $1
                 AND created_at >= now() - make_interval(days => $2)
               GROUP BY work_id
               UNION ALL
               SELECT work_id, 'bookmark', COUNT(*)
               FROM bookmarks WHERE user_id = $1
                 AND created_at >= now() - make_interval(days => $2)
               GROUP BY work_id
               UNION ALL
               SELECT work_id, 'comment', COUNT(*)
               FROM comments WHERE user_id = $1
                 AND created_at >= now() - make_interval(days => $2)
               GROUP BY work_id
               UNION ALL
               SELECT work_id, 'view', COUNT(*)
               FROM view_logs WHERE user_id = $1
                 AND created_at >= now() - make_interval(days => $2)
               GROUP BY work_id
             ) a
             JOIN works w ON w.id = a.work_id",
        )
        .bind(reader_id)
        .bind(PREFERENCE_WINDOW_DAYS)
        .fetch_all(&self.pool)
        .await?;

        let mut category_weights: HashMap<String, f64> = HashMap::new();
        let mut tag_weights: HashMap<String, f64> = HashMap::new();

        for row in &rows {
            let category: String = row.try_get("category")?;
            let tags: Vec<String> = row.try_get("tags")?;
            let action: String = row.try_get("action")?;
            let times: i64 = row.try_get("times")?;

            let weight = action_weight(&action, times);
            *category_weights.entry(category).or_insert(0.0) += weight;
            for tag in tags {
                *tag_weights.entry(tag).or_insert(0.0) += weight;
            }
        }

        let categories = category_weights
            .into_iter()
            .map(|(category, weight)| CategoryWeight { category, weight })
            .collect();
        let tags = tag_weights
            .into_iter()
            .map(|(tag, weight)| TagWeight { tag, weight })
            .collect();

        Ok(UserPreferenceProfile::new(categories, tags))
    }

    async fn fetch_reading_progress(&self, reader_id: Uuid) -> AppResult<HashMap<Uuid, f64>> {
        let rows = sqlx::query(
            "SELECT work_id, progress_percent FROM reading_progress WHERE user_id = $1",
        )
        .bind(reader_id)
        .fetch_all(&self.pool)
        .await?;

        let mut progress = HashMap::with_capacity(rows.len());
        for row in &rows {
            progress.insert(row.try_get("work_id")?, row.try_get("progress_percent")?);
        }
        Ok(progress)
    }

    async fn fetch_ctr_stats(&self, work_ids: &[Uuid]) -> AppResult<HashMap<Uuid, CtrStats>> {
        if work_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            "SELECT work_id, impression_count, unique_clicks,
                    avg_intersection_ratio, avg_display_duration
             FROM work_impressions
             WHERE work_id = ANY($1)",
        )
        .bind(work_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = HashMap::with_capacity(rows.len());
        for row in &rows {
            let impression_count: i64 = row.try_get("impression_count")?;
            let unique_clicks: i64 = row.try_get("unique_clicks")?;
            let ctr_unique = if impression_count > 0 {
                unique_clicks as f64 / impression_count as f64
            } else {
                0.0
            };
            stats.insert(
                row.try_get("work_id")?,
                CtrStats {
                    impression_count,
                    ctr_unique,
                    avg_intersection_ratio: row.try_get("avg_intersection_ratio")?,
                    avg_display_duration: row.try_get("avg_display_duration")?,
                },
            );
        }
        Ok(stats)
    }
}

/// Weight of one action row in the preference derivation. Repeat views earn
/// a bonus on top of the base view weight, capped.
fn action_weight(action: &str, times: i64) -> f64 {
    match action {
        "like" => LIKE_WEIGHT,
        "bookmark" => BOOKMARK_WEIGHT,
        "comment" => COMMENT_WEIGHT,
        "view" => {
            let repeats = (times - 1).max(0) as f64;
            VIEW_WEIGHT + (repeats * REPEAT_VIEW_BONUS_STEP).min(REPEAT_VIEW_BONUS_CAP)
        }
        _ => 0.0,
    }
}
