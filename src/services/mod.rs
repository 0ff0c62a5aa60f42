pub mod aggregator;
pub mod behavior;
pub mod blender;
pub mod filter;
pub mod quality;
pub mod ranker;
pub mod recommendations;
pub mod strategy;

pub use recommendations::RecommendationService;

/// All client-visible scores are rounded to 2 decimals
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
