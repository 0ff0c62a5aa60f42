use uuid::Uuid;

use crate::models::WorkCandidate;
use crate::repo::WorkRepository;

/// Works the reader has progressed past this far are not resurfaced
const MAX_RESUME_PROGRESS_PERCENT: f64 = 10.0;

/// Drops candidates the reader is already substantially into.
///
/// Fails open: if the progress telemetry cannot be fetched, nothing is
/// filtered. Showing a work the reader is mid-way through beats hiding the
/// whole feed.
pub async fn exclude_in_progress(
    repo: &dyn WorkRepository,
    reader_id: Uuid,
    candidates: Vec<WorkCandidate>,
) -> Vec<WorkCandidate> {
    let progress = match repo.fetch_reading_progress(reader_id).await {
        Ok(progress) => progress,
        Err(e) => {
            tracing::warn!(
                reader_id = %reader_id,
                error = %e,
                "Reading progress fetch failed, skipping recency exclusion"
            );
            return candidates;
        }
    };

    let before = candidates.len();
    let kept: Vec<WorkCandidate> = candidates
        .into_iter()
        .filter(|c| {
            progress
                .get(&c.work_id)
                .map(|p| *p <= MAX_RESUME_PROGRESS_PERCENT)
                .unwrap_or(true)
        })
        .collect();

    if kept.len() < before {
        tracing::debug!(
            reader_id = %reader_id,
            excluded = before - kept.len(),
            "Excluded in-progress works"
        );
    }

    kept
}
