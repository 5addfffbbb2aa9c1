pub mod design;
pub mod filter;
pub mod segment;

pub use design::{design, FilterClass, FilterCoefficients, DEFAULT_ORDER};
pub use filter::{apply_filter, CascadeFilter};
pub use segment::{SegmentFilterEngine, SegmentPlan};

/// Round to a fixed number of decimals for display and cache values.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
