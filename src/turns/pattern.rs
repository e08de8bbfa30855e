use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TwinError};
use crate::global_variables::SECONDS_PER_HALF_HOUR;
use crate::turns::Turn;

/// Categorical turn distribution of one approach road. The triple is
/// expected to sum to 1; consumers renormalise when the drift exceeds 1e-3.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TurnProbability {
    pub right: f64,
    pub left: f64,
    pub forward: f64,
}

impl TurnProbability {
    pub fn sum(&self) -> f64 {
        self.right + self.left + self.forward
    }

    pub fn is_normalised(&self) -> bool {
        (self.sum() - 1.0).abs() <= 1e-3
    }

    pub fn renormalised(&self) -> TurnProbability {
        let sum = self.sum();
        if sum <= 0.0 {
            return TurnProbability {
                right: 0.0,
                left: 0.0,
                forward: 1.0,
            };
        }
        TurnProbability {
            right: self.right / sum,
            left: self.left / sum,
            forward: self.forward / sum,
        }
    }

    /// Classifies a uniform draw into a turn. Band lower bounds compare with
    /// strict `<`: forward owns [0, p_f), right [p_f, p_f + p_r), left the
    /// rest.
    pub fn classify(&self, u: f64) -> Turn {
        if u < self.forward {
            Turn::Forward
        } else if u < self.forward + self.right {
            Turn::Right
        } else {
            Turn::Left
        }
    }
}

/// Static turn distributions keyed by (half-hour row, road), with a
/// per-window override slot that the turn predictor replaces wholesale.
#[derive(Debug, Clone, Default)]
pub struct TurnPatternTable {
    rows: HashMap<(u64, String), TurnProbability>,
    overrides: HashMap<String, TurnProbability>,
}

impl TurnPatternTable {
    pub fn empty() -> Self {
        Default::default()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| TwinError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_reader(file)
    }

    /// Reads `timestep_begin;road;prob_right;prob_left;prob_forward` rows.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b';')
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();
        let col = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| TwinError::Config(format!("turn pattern missing column '{}'", name)))
        };
        let (c_ts, c_road) = (col("timestep_begin")?, col("road")?);
        let (c_r, c_l, c_f) = (col("prob_right")?, col("prob_left")?, col("prob_forward")?);
        let mut rows = HashMap::new();
        for record in rdr.records() {
            let record = record?;
            let parse = |i: usize| -> Result<f64> {
                record
                    .get(i)
                    .and_then(|v| v.trim().parse().ok())
                    .ok_or_else(|| TwinError::Config("bad turn pattern row".into()))
            };
            let timestep: u64 = record
                .get(c_ts)
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| TwinError::Config("bad timestep_begin".into()))?;
            let road = record
                .get(c_road)
                .map(|v| v.trim().to_string())
                .ok_or_else(|| TwinError::Config("missing road".into()))?;
            rows.insert(
                (timestep / SECONDS_PER_HALF_HOUR, road),
                TurnProbability {
                    right: parse(c_r)?,
                    left: parse(c_l)?,
                    forward: parse(c_f)?,
                },
            );
        }
        Ok(TurnPatternTable {
            rows,
            overrides: HashMap::new(),
        })
    }

    /// Replaces all per-road overrides for the coming window; never mutates
    /// the installed map in place.
    pub fn set_window_overrides(&mut self, overrides: HashMap<String, TurnProbability>) {
        self.overrides = overrides;
    }

    pub fn clear_overrides(&mut self) {
        self.overrides.clear();
    }

    /// Probabilities for `road` at the given simulation timestep, override
    /// first, renormalised when the triple drifted.
    pub fn probs_for(&self, road: &str, timestep: u64) -> Option<TurnProbability> {
        let probs = self
            .overrides
            .get(road)
            .or_else(|| self.rows.get(&(timestep / SECONDS_PER_HALF_HOUR, road.to_string())))?;
        if probs.is_normalised() {
            Some(*probs)
        } else {
            warn!(
                "turn probabilities for {} sum to {:.4}; renormalising",
                road,
                probs.sum()
            );
            Some(probs.renormalised())
        }
    }
}
