pub mod contextual_history;

pub use contextual_history::{
    ContextualHistory, DateInfo, LaneMetrics, LaneSummary, SampleField, WindowRecord,
};
