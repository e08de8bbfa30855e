pub mod traffic_analyzer;

pub use traffic_analyzer::{FlowBand, FlowLevel, FlowLevels, TrafficAnalyzer};

/// Scale factor normalising per-hour flow references to the configured
/// temporal-window length.
pub fn window_proportion(window_minutes: u32) -> f64 {
    15.0 / window_minutes as f64
}
