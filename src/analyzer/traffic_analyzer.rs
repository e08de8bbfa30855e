use crate::analyzer::window_proportion;
use crate::global_variables::{FLOW_HIGH, FLOW_LOW, FLOW_MED, FLOW_VERY_LOW};

/// One reference flow level: vehicles per hour, mean and half-width.
#[derive(Debug, Clone, Copy)]
pub struct FlowLevel {
    pub mean: f64,
    pub range: f64,
}

/// The four configured reference levels, ascending.
#[derive(Debug, Clone, Copy)]
pub struct FlowLevels {
    pub very_low: FlowLevel,
    pub low: FlowLevel,
    pub med: FlowLevel,
    pub high: FlowLevel,
}

impl Default for FlowLevels {
    fn default() -> Self {
        let level = |(mean, range): (f64, f64)| FlowLevel { mean, range };
        FlowLevels {
            very_low: level(FLOW_VERY_LOW),
            low: level(FLOW_LOW),
            med: level(FLOW_MED),
            high: level(FLOW_HIGH),
        }
    }
}

/// Flow intensity band of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowBand {
    VeryLow,
    Low,
    Med,
    High,
}

/// Maps live (north-south, east-west) vehicle counts of one window to a
/// discrete traffic-type 0..=11, or -1 when the pair falls outside the
/// defined bands (consumers retain the previous type).
#[derive(Debug, Clone)]
pub struct TrafficAnalyzer {
    /// Rounded lower bounds of the four bands, scaled to the window length.
    lower_bounds: [i64; 4],
}

const TYPE_TABLE: [(FlowBand, FlowBand); 12] = [
    (FlowBand::VeryLow, FlowBand::VeryLow),
    (FlowBand::VeryLow, FlowBand::Low),
    (FlowBand::Low, FlowBand::VeryLow),
    (FlowBand::Low, FlowBand::Low),
    (FlowBand::Low, FlowBand::Med),
    (FlowBand::Low, FlowBand::High),
    (FlowBand::Med, FlowBand::Low),
    (FlowBand::Med, FlowBand::Med),
    (FlowBand::Med, FlowBand::High),
    (FlowBand::High, FlowBand::Low),
    (FlowBand::High, FlowBand::Med),
    (FlowBand::High, FlowBand::High),
];

impl TrafficAnalyzer {
    pub fn new(levels: FlowLevels, window_minutes: u32) -> Self {
        let proportion = window_proportion(window_minutes);
        let scale = |l: FlowLevel| ((l.mean - l.range) / proportion).round() as i64;
        TrafficAnalyzer {
            lower_bounds: [
                scale(levels.very_low),
                scale(levels.low),
                scale(levels.med),
                scale(levels.high),
            ],
        }
    }

    pub fn with_defaults(window_minutes: u32) -> Self {
        Self::new(FlowLevels::default(), window_minutes)
    }

    /// The highest band whose scaled lower bound does not exceed the count.
    pub fn band(&self, count: u64) -> Option<FlowBand> {
        let count = count as i64;
        if count >= self.lower_bounds[3] {
            Some(FlowBand::High)
        } else if count >= self.lower_bounds[2] {
            Some(FlowBand::Med)
        } else if count >= self.lower_bounds[1] {
            Some(FlowBand::Low)
        } else if count >= self.lower_bounds[0] {
            Some(FlowBand::VeryLow)
        } else {
            None
        }
    }

    /// Traffic type of a (ns, ew) count pair; -1 when either axis is below
    /// the very_low band or the band pair is not one of the 12 defined.
    pub fn traffic_type(&self, passing_veh_ns: u64, passing_veh_ew: u64) -> i8 {
        let (ns, ew) = match (self.band(passing_veh_ns), self.band(passing_veh_ew)) {
            (Some(ns), Some(ew)) => (ns, ew),
            _ => return -1,
        };
        TYPE_TABLE
            .iter()
            .position(|&pair| pair == (ns, ew))
            .map(|i| i as i8)
            .unwrap_or(-1)
    }

    /// Decodes a traffic type back into its (ns, ew) band pair.
    pub fn decode(traffic_type: i8) -> Option<(FlowBand, FlowBand)> {
        TYPE_TABLE.get(usize::try_from(traffic_type).ok()?).copied()
    }
}
