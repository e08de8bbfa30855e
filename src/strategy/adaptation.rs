use std::collections::HashMap;
use std::str::FromStr;

use log::debug;

use crate::analyzer::TrafficAnalyzer;
use crate::errors::TwinError;
use crate::history::{ContextualHistory, DateInfo};
use crate::predictor::TrafficPredictor;

/// The pluggable adaptation policies. `Self*` variants look only at the
/// owning traffic light; `Adjacent*` variants additionally blend the
/// published state of adjacent lights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptationStrategy {
    Static,
    SelfAnalyzer,
    SelfPredictor,
    SelfAnalyzerAndPredictor,
    SelfAnalyzerTurnPredictor,
    AdjacentAnalyzer,
    AdjacentPredictor,
    AdjacentAnalyzerAndPredictor,
    AdjacentAnalyzerTurnPredictor,
}

impl AdaptationStrategy {
    pub fn uses_neighbours(&self) -> bool {
        matches!(
            self,
            AdaptationStrategy::AdjacentAnalyzer
                | AdaptationStrategy::AdjacentPredictor
                | AdaptationStrategy::AdjacentAnalyzerAndPredictor
                | AdaptationStrategy::AdjacentAnalyzerTurnPredictor
        )
    }

    pub fn uses_analyzer(&self) -> bool {
        !matches!(
            self,
            AdaptationStrategy::Static
                | AdaptationStrategy::SelfPredictor
                | AdaptationStrategy::AdjacentPredictor
        )
    }

    pub fn uses_traffic_predictor(&self) -> bool {
        matches!(
            self,
            AdaptationStrategy::SelfPredictor
                | AdaptationStrategy::SelfAnalyzerAndPredictor
                | AdaptationStrategy::AdjacentPredictor
                | AdaptationStrategy::AdjacentAnalyzerAndPredictor
        )
    }

    pub fn uses_turn_predictor(&self) -> bool {
        matches!(
            self,
            AdaptationStrategy::SelfAnalyzerTurnPredictor
                | AdaptationStrategy::AdjacentAnalyzerTurnPredictor
        )
    }
}

impl FromStr for AdaptationStrategy {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "static" => Ok(AdaptationStrategy::Static),
            "self-analyzer" => Ok(AdaptationStrategy::SelfAnalyzer),
            "self-predictor" => Ok(AdaptationStrategy::SelfPredictor),
            "self-analyzer-and-predictor" => Ok(AdaptationStrategy::SelfAnalyzerAndPredictor),
            "self-analyzer-turn-predictor" => Ok(AdaptationStrategy::SelfAnalyzerTurnPredictor),
            "adjacent-analyzer" => Ok(AdaptationStrategy::AdjacentAnalyzer),
            "adjacent-predictor" => Ok(AdaptationStrategy::AdjacentPredictor),
            "adjacent-analyzer-and-predictor" => {
                Ok(AdaptationStrategy::AdjacentAnalyzerAndPredictor)
            }
            "adjacent-analyzer-turn-predictor" => {
                Ok(AdaptationStrategy::AdjacentAnalyzerTurnPredictor)
            }
            other => Err(TwinError::Config(format!("unknown strategy '{}'", other))),
        }
    }
}

/// Which flow axis an inbound lane feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    NorthSouth,
    EastWest,
}

/// The configured signal programs of one traffic light plus the 12-entry
/// traffic-type table. `turn_program_bias` is the hook for blending turn
/// predictions into program choice; empty means inert.
#[derive(Debug, Clone, Default)]
pub struct ProgramTable {
    pub programs: Vec<String>,
    pub tt_program: HashMap<i8, String>,
    pub turn_program_bias: HashMap<i8, i8>,
}

impl ProgramTable {
    /// Default table: traffic types spread over the program list in order.
    pub fn from_programs(programs: Vec<String>) -> Self {
        let tt_program = if programs.is_empty() {
            HashMap::new()
        } else {
            (0..12i8)
                .map(|t| {
                    let idx = (t as usize * programs.len()) / 12;
                    (t, programs[idx].clone())
                })
                .collect()
        };
        ProgramTable {
            programs,
            tt_program,
            turn_program_bias: HashMap::new(),
        }
    }

    pub fn centre_program(&self) -> Option<&str> {
        self.programs.get(self.programs.len() / 2).map(|s| s.as_str())
    }

    pub fn program_for_type(&self, traffic_type: i8) -> Option<&str> {
        self.tt_program.get(&traffic_type).map(|s| s.as_str())
    }
}

/// Everything `choose_program` is allowed to look at; the function itself
/// holds no state.
pub struct StrategyInputs<'a> {
    pub history: &'a ContextualHistory,
    pub neighbours: &'a HashMap<String, ContextualHistory>,
    pub window: u64,
    pub current_program: &'a str,
    pub ns_lanes: &'a [String],
    pub ew_lanes: &'a [String],
    /// Per adjacent traffic light: its outbound lanes feeding this junction
    /// and the axis they feed.
    pub feeding_lanes: &'a HashMap<String, Vec<(String, Axis)>>,
    pub analyzer: Option<&'a TrafficAnalyzer>,
    pub predictor: Option<&'a TrafficPredictor>,
    pub date: Option<DateInfo>,
}

fn lane_counts(history: &ContextualHistory, window: u64, lanes: &[String]) -> u64 {
    history
        .window(window)
        .map(|record| lanes.iter().map(|l| record.num_passing(l)).sum())
        .unwrap_or(0)
}

/// (ns, ew) counts of the current window, optionally blended with the
/// neighbour lanes feeding this junction. Missing neighbour windows degrade
/// to self-only silently.
fn blended_counts(inputs: &StrategyInputs<'_>, with_neighbours: bool) -> (u64, u64) {
    let mut ns = lane_counts(inputs.history, inputs.window, inputs.ns_lanes);
    let mut ew = lane_counts(inputs.history, inputs.window, inputs.ew_lanes);
    if !with_neighbours {
        return (ns, ew);
    }
    for (neighbour_id, lanes) in inputs.feeding_lanes {
        let neighbour = match inputs.neighbours.get(neighbour_id) {
            Some(h) => h,
            None => continue,
        };
        let record = match neighbour.window(inputs.window) {
            Some(r) => r,
            None => continue,
        };
        for (lane, axis) in lanes {
            match axis {
                Axis::NorthSouth => ns += record.num_passing(lane),
                Axis::EastWest => ew += record.num_passing(lane),
            }
        }
    }
    (ns, ew)
}

fn analyzer_type(inputs: &StrategyInputs<'_>, counts: (u64, u64)) -> Option<i8> {
    let t = inputs.analyzer?.traffic_type(counts.0, counts.1);
    if t < 0 {
        None
    } else {
        Some(t)
    }
}

fn predictor_type(inputs: &StrategyInputs<'_>, counts: (u64, u64)) -> Option<i8> {
    let predictor = inputs.predictor?;
    let date = inputs.date?;
    match predictor.predict_for_window(&date, Some(counts), 0) {
        Ok(t) if t >= 0 => Some(t),
        Ok(_) => None,
        Err(err) => {
            debug!(
                "{}: predictor bypassed for window {}: {}",
                inputs.history.tl_id(),
                inputs.window,
                err
            );
            None
        }
    }
}

/// Analyzer and predictor disagree by more than 3 types: move the analyzer
/// value a third of the gap toward the predictor.
fn combine(analyzer: i8, predictor: i8) -> i8 {
    let delta = predictor as i32 - analyzer as i32;
    if delta.abs() <= 3 {
        return analyzer;
    }
    let shift = (delta.abs() + 2) / 3; // ceil(|delta| / 3)
    let combined = analyzer as i32 + shift * delta.signum();
    combined.clamp(0, 11) as i8
}

/// Selects the next signal program. Returning the currently active program
/// is a no-op for the caller.
pub fn choose_program(
    strategy: AdaptationStrategy,
    inputs: &StrategyInputs<'_>,
    table: &ProgramTable,
) -> String {
    let keep = inputs.current_program.to_string();
    if strategy == AdaptationStrategy::Static {
        return table.centre_program().map(str::to_string).unwrap_or(keep);
    }
    let counts = blended_counts(inputs, strategy.uses_neighbours());
    let analyzer = if strategy.uses_analyzer() {
        analyzer_type(inputs, counts)
    } else {
        None
    };
    let predictor = if strategy.uses_traffic_predictor() {
        predictor_type(inputs, counts)
    } else {
        None
    };
    let mut traffic_type = match (analyzer, predictor) {
        (Some(a), Some(p)) => Some(combine(a, p)),
        (Some(a), None) => Some(a),
        // Predictor-only strategies, or analyzer bypassed.
        (None, Some(p)) => Some(p),
        (None, None) => None,
    };
    if strategy.uses_turn_predictor() {
        if let Some(t) = traffic_type {
            if let Some(bias) = table.turn_program_bias.get(&t) {
                traffic_type = Some((t as i32 + *bias as i32).clamp(0, 11) as i8);
            }
        }
    }
    match traffic_type.and_then(|t| table.program_for_type(t)) {
        Some(program) => program.to_string(),
        // Undefined type or missing table entry: no program churn.
        None => keep,
    }
}
