use std::path::Path;

use log::warn;

use crate::errors::{Result, TwinError};
use crate::history::DateInfo;
use crate::predictor::artifacts::{FeatureRow, ModelBundle};
use crate::turns::TurnProbability;

/// Inference over the stored turn-probability regressors, ranked by MSE
/// ascending. Maps (road, date, hour) to a (p_right, p_left, p_forward)
/// triple.
#[derive(Debug, Clone)]
pub struct TurnPredictor {
    bundle: ModelBundle,
}

impl TurnPredictor {
    pub fn load(dir: &Path, n_best: usize) -> Result<Self> {
        Ok(TurnPredictor {
            bundle: ModelBundle::load_dir(dir, n_best, true)?,
        })
    }

    pub fn from_bundle(bundle: ModelBundle) -> Self {
        TurnPredictor { bundle }
    }

    pub fn predict(&self, road: &str, date: &DateInfo, n: usize) -> Result<TurnProbability> {
        let model = self.bundle.model(n)?;
        let row = FeatureRow::new()
            .cat("road_id", road)
            .num("hour", date.hour as f64)
            .num("date_day", date.day as f64)
            .num("date_month", date.month as f64)
            .num("date_year", date.year as f64);
        let x = row.resolve(&model.features, &self.bundle.parsed_values)?;
        let out = model.score(&x);
        if out.len() != 3 {
            return Err(TwinError::Config(format!(
                "turn model produced {} outputs, expected 3",
                out.len()
            )));
        }
        let probs = TurnProbability {
            right: out[0],
            left: out[1],
            forward: out[2],
        };
        if probs.is_normalised() {
            Ok(probs)
        } else {
            warn!(
                "turn prediction for {} sums to {:.4}; renormalising",
                road,
                probs.sum()
            );
            Ok(probs.renormalised())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::predictor::artifacts::{LinearModel, ParsedValues};

    fn parsed() -> ParsedValues {
        let mut roads = HashMap::new();
        roads.insert("n1_c1".to_string(), 0.0);
        roads.insert("n2_c1".to_string(), 1.0);
        let mut map = HashMap::new();
        map.insert("road_id".to_string(), roads);
        ParsedValues(map)
    }

    fn constant_model(out: [f64; 3], performance: f64) -> LinearModel {
        LinearModel {
            features: vec!["road_id".to_string(), "hour".to_string()],
            weights: vec![vec![0.0, 0.0]; 3],
            intercepts: out.to_vec(),
            performance,
        }
    }

    fn date() -> DateInfo {
        DateInfo {
            year: 2021,
            month: 3,
            day: 15,
            weekday: 0,
            hour: 8,
            minute: 0,
        }
    }

    #[test]
    fn predicts_turn_triple() {
        let bundle =
            ModelBundle::from_parts(vec![constant_model([0.2, 0.2, 0.6], 0.01)], parsed());
        let predictor = TurnPredictor::from_bundle(bundle);
        let probs = predictor.predict("n1_c1", &date(), 0).unwrap();
        assert!((probs.forward - 0.6).abs() < 1e-9);
        assert!(probs.is_normalised());
    }

    #[test]
    fn drifted_output_is_renormalised() {
        let bundle =
            ModelBundle::from_parts(vec![constant_model([0.4, 0.4, 0.4], 0.01)], parsed());
        let predictor = TurnPredictor::from_bundle(bundle);
        let probs = predictor.predict("n1_c1", &date(), 0).unwrap();
        assert!((probs.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_road_is_a_missing_feature() {
        let bundle =
            ModelBundle::from_parts(vec![constant_model([0.2, 0.2, 0.6], 0.01)], parsed());
        let predictor = TurnPredictor::from_bundle(bundle);
        assert!(predictor.predict("ghost_road", &date(), 0).is_err());
    }
}
