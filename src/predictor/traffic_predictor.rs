use std::path::Path;

use crate::analyzer::window_proportion;
use crate::errors::Result;
use crate::history::DateInfo;
use crate::predictor::artifacts::{FeatureRow, ModelBundle, ParsedValues};

pub const WEEKDAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Inference over the stored traffic-type classifiers, ranked by F1 score.
/// Maps a date (and optionally the live per-axis counts, scaled to the
/// window length) to a traffic-type 0..=11.
#[derive(Debug, Clone)]
pub struct TrafficPredictor {
    bundle: ModelBundle,
    include_counts: bool,
    proportion: f64,
}

impl TrafficPredictor {
    pub fn load(dir: &Path, n_best: usize, include_counts: bool, window_minutes: u32) -> Result<Self> {
        Ok(TrafficPredictor {
            bundle: ModelBundle::load_dir(dir, n_best, false)?,
            include_counts,
            proportion: window_proportion(window_minutes),
        })
    }

    pub fn from_bundle(bundle: ModelBundle, include_counts: bool, window_minutes: u32) -> Self {
        TrafficPredictor {
            bundle,
            include_counts,
            proportion: window_proportion(window_minutes),
        }
    }

    pub fn parsed_values(&self) -> &ParsedValues {
        &self.bundle.parsed_values
    }

    /// The feature row the classifiers were trained on. Counts only join it
    /// when the predictor is configured to use them.
    pub fn feature_row(&self, date: &DateInfo, counts: Option<(u64, u64)>) -> FeatureRow {
        let mut row = FeatureRow::new()
            .num("hour", date.hour as f64)
            .cat("weekday", WEEKDAY_NAMES[date.weekday as usize % 7])
            .num("date_day", date.day as f64)
            .num("date_month", date.month as f64)
            .num("date_year", date.year as f64);
        if self.include_counts {
            if let Some((ns, ew)) = counts {
                row = row
                    .num("passing_veh_ns", ns as f64 * self.proportion)
                    .num("passing_veh_ew", ew as f64 * self.proportion);
            }
        }
        row
    }

    /// Top-1 classification from model `n`.
    pub fn predict(&self, row: &FeatureRow, n: usize) -> Result<i8> {
        let model = self.bundle.model(n)?;
        let x = row.resolve(&model.features, &self.bundle.parsed_values)?;
        let scores = model.score(&x);
        let best = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i as i8)
            .unwrap_or(-1);
        Ok(best)
    }

    pub fn predict_for_window(
        &self,
        date: &DateInfo,
        counts: Option<(u64, u64)>,
        n: usize,
    ) -> Result<i8> {
        self.predict(&self.feature_row(date, counts), n)
    }
}
