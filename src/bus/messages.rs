use serde::{Deserialize, Serialize};

use crate::history::{DateInfo, LaneSummary};
use crate::turns::TurnProbability;

/// Window summary a traffic light publishes on `traffic_info/{tl_id}` at
/// window close. `info` carries one entry per inbound lane, flattened for
/// time-series collectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficInfoMessage {
    pub tl_id: String,
    pub temporal_window: u64,
    pub date_info: Option<DateInfo>,
    pub actual_program: String,
    pub info: Vec<LaneSummary>,
}

/// Published on `traffic_analysis/{tl_id}` when the analyzer is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMessage {
    pub tl_id: String,
    pub temporal_window: u64,
    pub traffic_type: i8,
}

/// Published on `traffic_prediction/{tl_id}` when the predictor is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionMessage {
    pub tl_id: String,
    pub temporal_window: u64,
    pub predicted_type: i8,
}

/// Published on `turn_prediction/{tl_id}`, one message per inbound road.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnPredictionMessage {
    pub tl_id: String,
    pub temporal_window: u64,
    pub road: String,
    pub probability: TurnProbability,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traffic_info_payload_is_compact_json() {
        let msg = TrafficInfoMessage {
            tl_id: "c3".to_string(),
            temporal_window: 4,
            date_info: None,
            actual_program: "p2".to_string(),
            info: Vec::new(),
        };
        let payload = serde_json::to_string(&msg).unwrap();
        assert!(!payload.contains(' '));
        assert!(payload.contains("\"tl_id\":\"c3\""));
        let back: TrafficInfoMessage = serde_json::from_str(&payload).unwrap();
        assert_eq!(back.temporal_window, 4);
        assert_eq!(back.actual_program, "p2");
    }

    #[test]
    fn lane_summary_keeps_uppercase_emission_keys() {
        let msg = TrafficInfoMessage {
            tl_id: "c3".to_string(),
            temporal_window: 0,
            date_info: None,
            actual_program: "p1".to_string(),
            info: vec![LaneSummary {
                lane: "n1_c3_0".to_string(),
                num_passing_veh: 7,
                waiting_time_veh: 12.5,
                avg_occupancy: 0.2,
                avg_co2: 1.0,
                avg_co: 2.0,
                avg_hc: 3.0,
                avg_pmx: 4.0,
                avg_nox: 5.0,
                avg_noise: 6.0,
            }],
        };
        let payload = serde_json::to_string(&msg).unwrap();
        assert!(payload.contains("\"avg_CO2\":1.0"));
        assert!(payload.contains("\"avg_NOx\":5.0"));
    }
}
