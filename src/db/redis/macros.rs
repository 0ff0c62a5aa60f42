/// Read-through caching for whole-result aggregates.
///
/// Checks the cache for the given key; on a miss, evaluates the block,
/// stores the value with the given TTL, and returns it. Cache failures are
/// treated as misses, so the block is the source of truth.
///
/// # Arguments
/// * `$cache`: a `&dyn ResultCache`
/// * `$key`: the `CacheKey` for the value
/// * `$ttl`: time-to-live in seconds
/// * `$block`: an async expression computing the value on a miss
///
/// # Example
/// ```rust,ignore
/// let works = cached!(cache, CacheKey::PopularWorks { limit }, ttl, {
///     repo.fetch_popular_works(limit).await.unwrap_or_default()
/// });
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        let key = $key;
        if let Some(cached) = $crate::db::get_cached($cache, &key).await {
            cached
        } else {
            let value = $block;
            $crate::db::put_cached($cache, &key, &value, $ttl);
            value
        }
    }};
}
