use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::models::{ScoredWork, UserPreferenceProfile};
use crate::repo::WorkRepository;

/// Interleaves off-profile "challenge" works into a ranked page for
/// discovery.
///
/// Only runs for pages larger than the single-page default: a small page has
/// no room to spend roughly a fifth of its slots on discovery.
pub struct DiversityBlender {
    repo: Arc<dyn WorkRepository>,
    /// One challenge slot per this many requested works
    challenge_divisor: usize,
    /// A challenge work lands at every Nth output slot
    challenge_interval: usize,
    default_page_size: usize,
}

impl DiversityBlender {
    pub fn new(
        repo: Arc<dyn WorkRepository>,
        challenge_divisor: usize,
        challenge_interval: usize,
        default_page_size: usize,
    ) -> Self {
        Self {
            repo,
            challenge_divisor,
            challenge_interval,
            default_page_size,
        }
    }

    pub async fn blend(
        &self,
        reader_id: Uuid,
        profile: &UserPreferenceProfile,
        regular: Vec<ScoredWork>,
        target_count: usize,
    ) -> Vec<ScoredWork> {
        if target_count <= self.default_page_size {
            return truncated(regular, target_count);
        }

        let challenge_count = target_count.div_ceil(self.challenge_divisor);

        // Request double the quota: the repository may come up short after
        // its own exclusions, and we dedup below
        let fetched = match self
            .repo
            .fetch_challenge_works(
                reader_id,
                &profile.category_names(),
                &profile.tag_names(),
                challenge_count * 2,
            )
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(
                    reader_id = %reader_id,
                    error = %e,
                    "Challenge source failed, serving unblended page"
                );
                return truncated(regular, target_count);
            }
        };

        let regular_ids: HashSet<Uuid> = regular.iter().map(|w| w.work.work_id).collect();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let challenge: Vec<ScoredWork> = fetched
            .into_iter()
            .filter(|c| seen.insert(c.work.work_id) && !regular_ids.contains(&c.work.work_id))
            .take(challenge_count)
            .map(|c| ScoredWork::unscored(c.work))
            .collect();

        if challenge.is_empty() {
            return truncated(regular, target_count);
        }

        tracing::debug!(
            reader_id = %reader_id,
            challenge_count = challenge.len(),
            target_count,
            "Blending challenge works into page"
        );

        interleave(regular, challenge, target_count, self.challenge_interval)
    }
}

fn truncated(mut works: Vec<ScoredWork>, target_count: usize) -> Vec<ScoredWork> {
    works.truncate(target_count);
    works
}

/// Walks the output slot by slot: every Nth slot takes the next challenge
/// work while any remain, every other slot takes the next regular work.
/// Once one pool runs dry the other drains into the remaining slots.
fn interleave(
    regular: Vec<ScoredWork>,
    challenge: Vec<ScoredWork>,
    target_count: usize,
    interval: usize,
) -> Vec<ScoredWork> {
    let mut regular = regular.into_iter();
    let mut challenge = challenge.into_iter().peekable();
    let mut blended = Vec::with_capacity(target_count);

    for i in 0..target_count {
        let take_challenge = (i + 1) % interval == 0 && challenge.peek().is_some();
        let next = if take_challenge {
            challenge.next()
        } else {
            regular.next().or_else(|| challenge.next())
        };

        match next {
            Some(work) => blended.push(work),
            None => break,
        }
    }

    blended
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{ChallengeCandidate, ChallengeReason, WorkCandidate};
    use crate::repo::MockWorkRepository;
    use chrono::Utc;

    fn work(title: &str) -> WorkCandidate {
        WorkCandidate {
            work_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: title.to_string(),
            description: "description".to_string(),
            category: "fantasy".to_string(),
            tags: vec![],
            content_length: 1000,
            has_cover_image: false,
            views: 0,
            likes: 0,
            comments: 0,
            trend_score: 0.0,
            created_at: Utc::now(),
        }
    }

    fn regular_works(count: usize) -> Vec<ScoredWork> {
        (0..count)
            .map(|i| ScoredWork::unscored(work(&format!("regular-{}", i))))
            .collect()
    }

    fn challenge_works(count: usize) -> Vec<ChallengeCandidate> {
        (0..count)
            .map(|i| ChallengeCandidate {
                work: work(&format!("challenge-{}", i)),
                reason: ChallengeReason::NewCategory,
            })
            .collect()
    }

    fn blender(repo: MockWorkRepository) -> DiversityBlender {
        DiversityBlender::new(Arc::new(repo), 5, 8, 9)
    }

    #[tokio::test]
    async fn test_small_pages_skip_blending_entirely() {
        // The repository must not be called at all for a default-size page
        let repo = MockWorkRepository::new();
        let b = blender(repo);

        let result = b
            .blend(
                Uuid::new_v4(),
                &UserPreferenceProfile::default(),
                regular_works(20),
                9,
            )
            .await;

        assert_eq!(result.len(), 9);
        assert!(result.iter().all(|w| w.work.title.starts_with("regular")));
    }

    #[tokio::test]
    async fn test_challenge_cadence_for_target_72() {
        let mut repo = MockWorkRepository::new();
        repo.expect_fetch_challenge_works()
            .withf(|_, _, _, limit| *limit == 30)
            .returning(|_, _, _, limit| Ok(challenge_works(limit)));
        let b = blender(repo);

        let result = b
            .blend(
                Uuid::new_v4(),
                &UserPreferenceProfile::default(),
                regular_works(72),
                72,
            )
            .await;

        assert_eq!(result.len(), 72);

        // ceil(72/5) = 15 challenge works are sourced; they land at 1-based
        // positions 8, 16, 24... while regulars last, so 9 fit in 72 slots
        let challenge_positions: Vec<usize> = result
            .iter()
            .enumerate()
            .filter(|(_, w)| w.work.title.starts_with("challenge"))
            .map(|(i, _)| i + 1)
            .collect();

        let expected: Vec<usize> = (1..=9).map(|n| n * 8).collect();
        assert_eq!(challenge_positions, expected);
    }

    #[tokio::test]
    async fn test_no_challenge_candidates_returns_truncated_regulars() {
        let mut repo = MockWorkRepository::new();
        repo.expect_fetch_challenge_works()
            .returning(|_, _, _, _| Ok(vec![]));
        let b = blender(repo);

        let result = b
            .blend(
                Uuid::new_v4(),
                &UserPreferenceProfile::default(),
                regular_works(30),
                18,
            )
            .await;

        assert_eq!(result.len(), 18);
        assert!(result.iter().all(|w| w.work.title.starts_with("regular")));
    }

    #[tokio::test]
    async fn test_challenge_source_failure_fails_open() {
        let mut repo = MockWorkRepository::new();
        repo.expect_fetch_challenge_works()
            .returning(|_, _, _, _| Err(AppError::Internal("source down".to_string())));
        let b = blender(repo);

        let result = b
            .blend(
                Uuid::new_v4(),
                &UserPreferenceProfile::default(),
                regular_works(30),
                18,
            )
            .await;

        assert_eq!(result.len(), 18);
    }

    #[tokio::test]
    async fn test_challenge_pool_is_deduplicated() {
        let mut repo = MockWorkRepository::new();
        repo.expect_fetch_challenge_works().returning(|_, _, _, _| {
            let one = challenge_works(1).remove(0);
            Ok(vec![one.clone(), one.clone(), one])
        });
        let b = blender(repo);

        let result = b
            .blend(
                Uuid::new_v4(),
                &UserPreferenceProfile::default(),
                regular_works(30),
                18,
            )
            .await;

        let challenge_count = result
            .iter()
            .filter(|w| w.work.title.starts_with("challenge"))
            .count();
        assert_eq!(challenge_count, 1);

        let mut ids: Vec<Uuid> = result.iter().map(|w| w.work.work_id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), result.len());
    }

    #[tokio::test]
    async fn test_short_regular_pool_drains_challenges() {
        let mut repo = MockWorkRepository::new();
        repo.expect_fetch_challenge_works()
            .returning(|_, _, _, limit| Ok(challenge_works(limit)));
        let b = blender(repo);

        // 5 regulars for a 20-slot page: the page ends with challenge works
        let result = b
            .blend(
                Uuid::new_v4(),
                &UserPreferenceProfile::default(),
                regular_works(5),
                20,
            )
            .await;

        // 5 regulars + ceil(20/5)=4 challenge works is all that exists
        assert_eq!(result.len(), 9);
        assert!(result[result.len() - 1].work.title.starts_with("challenge"));
    }
}
