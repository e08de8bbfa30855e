use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TwinError};
use crate::turns::Turn;

/// Calendar fields of one temporal window, set once at window open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateInfo {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    /// Monday = 0 .. Sunday = 6.
    pub weekday: u32,
    pub hour: u32,
    pub minute: u32,
}

/// Per-tick sample streams a lane accumulates inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleField {
    Occupancy,
    Co2,
    Co,
    Hc,
    Pmx,
    Nox,
    Noise,
}

/// In-window accumulator for one inbound lane.
#[derive(Debug, Clone, Default)]
pub struct LaneMetrics {
    pub num_passing_veh: u64,
    pub waiting_time_veh: f64,
    /// Raw waiting-time reading from the previous tick, for the monotonic
    /// recording rule.
    last_waiting_reading: f64,
    pub occupancy: Vec<f64>,
    pub co2: Vec<f64>,
    pub co: Vec<f64>,
    pub hc: Vec<f64>,
    pub pmx: Vec<f64>,
    pub nox: Vec<f64>,
    pub noise: Vec<f64>,
}

impl LaneMetrics {
    fn samples_mut(&mut self, field: SampleField) -> &mut Vec<f64> {
        match field {
            SampleField::Occupancy => &mut self.occupancy,
            SampleField::Co2 => &mut self.co2,
            SampleField::Co => &mut self.co,
            SampleField::Hc => &mut self.hc,
            SampleField::Pmx => &mut self.pmx,
            SampleField::Nox => &mut self.nox,
            SampleField::Noise => &mut self.noise,
        }
    }
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

/// Processed per-lane totals and means; the `info` entries of the published
/// window payload, and the rows written back to the topology store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneSummary {
    pub lane: String,
    pub num_passing_veh: u64,
    pub waiting_time_veh: f64,
    pub avg_occupancy: f64,
    #[serde(rename = "avg_CO2")]
    pub avg_co2: f64,
    #[serde(rename = "avg_CO")]
    pub avg_co: f64,
    #[serde(rename = "avg_HC")]
    pub avg_hc: f64,
    #[serde(rename = "avg_PMx")]
    pub avg_pmx: f64,
    #[serde(rename = "avg_NOx")]
    pub avg_nox: f64,
    pub avg_noise: f64,
}

/// All contextual measurements of one traffic light for one temporal window.
/// Mutable only while it is the current window; frozen at window close.
#[derive(Debug, Clone, Default)]
pub struct WindowRecord {
    pub date_info: Option<DateInfo>,
    pub actual_program: String,
    per_lane: HashMap<String, LaneMetrics>,
    turning_vehicles: HashMap<Turn, u64>,
    vehicles_passed: HashSet<String>,
    turning_vehicles_passed: HashSet<String>,
    frozen: bool,
}

impl WindowRecord {
    fn with_lanes(lanes: &[String], actual_program: String) -> Self {
        WindowRecord {
            actual_program,
            per_lane: lanes
                .iter()
                .map(|l| (l.clone(), LaneMetrics::default()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn lane(&self, lane: &str) -> Option<&LaneMetrics> {
        self.per_lane.get(lane)
    }

    pub fn num_passing(&self, lane: &str) -> u64 {
        self.per_lane.get(lane).map(|m| m.num_passing_veh).unwrap_or(0)
    }

    pub fn turning_count(&self, turn: Turn) -> u64 {
        self.turning_vehicles.get(&turn).copied().unwrap_or(0)
    }

    pub fn turning_total(&self) -> u64 {
        self.turning_vehicles.values().sum()
    }

    pub fn vehicles_passed_count(&self) -> usize {
        self.vehicles_passed.len()
    }

    pub fn is_turn_recorded(&self, vehicle: &str) -> bool {
        self.turning_vehicles_passed.contains(vehicle)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

/// Bounded ring of WindowRecords for one traffic light, indexed by the
/// monotonically increasing temporal-window number. At most `capacity`
/// windows stay in memory; older ones are evicted at open.
#[derive(Debug, Clone)]
pub struct ContextualHistory {
    tl_id: String,
    lanes: Vec<String>,
    capacity: usize,
    windows: VecDeque<(u64, WindowRecord)>,
    current: Option<u64>,
}

impl ContextualHistory {
    pub fn new(tl_id: impl Into<String>, lanes: Vec<String>, capacity: usize) -> Self {
        ContextualHistory {
            tl_id: tl_id.into(),
            lanes,
            capacity: capacity.max(1),
            windows: VecDeque::new(),
            current: None,
        }
    }

    pub fn tl_id(&self) -> &str {
        &self.tl_id
    }

    pub fn current_window(&self) -> Option<u64> {
        self.current
    }

    pub fn window(&self, w: u64) -> Option<&WindowRecord> {
        self.windows
            .iter()
            .find(|(idx, _)| *idx == w)
            .map(|(_, r)| r)
    }

    /// Opens window `w`, inheriting the traffic light's lane list. `w` must
    /// be 0 for the initial window or exactly current + 1 afterwards.
    pub fn open_window(&mut self, w: u64, actual_program: &str) -> Result<()> {
        let valid = match self.current {
            None => w == 0,
            Some(current) => w == current + 1,
        };
        if !valid {
            return Err(TwinError::WindowFrozen {
                window: w,
                current: self.current.unwrap_or(0),
            });
        }
        self.windows
            .push_back((w, WindowRecord::with_lanes(&self.lanes, actual_program.into())));
        while self.windows.len() > self.capacity {
            self.windows.pop_front();
        }
        self.current = Some(w);
        Ok(())
    }

    /// Marks window `w` read-only. Done after publish and store write-back.
    pub fn freeze_window(&mut self, w: u64) {
        if let Some((_, record)) = self.windows.iter_mut().find(|(idx, _)| *idx == w) {
            record.frozen = true;
        }
    }

    fn writable(&mut self, w: u64) -> Result<&mut WindowRecord> {
        let current = self.current.unwrap_or(0);
        match self.windows.iter_mut().find(|(idx, _)| *idx == w) {
            Some((_, record)) if !record.frozen && Some(w) == self.current => Ok(record),
            Some(_) => Err(TwinError::WindowFrozen { window: w, current }),
            None => Err(TwinError::WindowFrozen { window: w, current }),
        }
    }

    pub fn set_date(&mut self, w: u64, date_info: DateInfo) -> Result<()> {
        self.writable(w)?.date_info = Some(date_info);
        Ok(())
    }

    pub fn set_program(&mut self, w: u64, program: &str) -> Result<()> {
        self.writable(w)?.actual_program = program.to_string();
        Ok(())
    }

    /// Counts only vehicle ids not yet seen in this window; the rest were
    /// already counted on some lane.
    pub fn add_passing(&mut self, w: u64, lane: &str, veh_ids: &[String]) -> Result<u64> {
        let record = self.writable(w)?;
        let mut added = 0;
        for id in veh_ids {
            if record.vehicles_passed.insert(id.clone()) {
                if let Some(metrics) = record.per_lane.get_mut(lane) {
                    metrics.num_passing_veh += 1;
                    added += 1;
                } else {
                    record.vehicles_passed.remove(id);
                }
            }
        }
        Ok(added)
    }

    /// Monotonic waiting-time rule: the previous raw reading is banked only
    /// when it was strictly greater than the current one (some vehicle left
    /// the queue); still-waiting vehicles are never double-counted.
    pub fn add_waiting(&mut self, w: u64, lane: &str, current_reading: f64) -> Result<()> {
        let record = self.writable(w)?;
        if let Some(metrics) = record.per_lane.get_mut(lane) {
            if metrics.last_waiting_reading > current_reading {
                metrics.waiting_time_veh += metrics.last_waiting_reading;
            }
            metrics.last_waiting_reading = current_reading;
        }
        Ok(())
    }

    pub fn append_lane_sample(
        &mut self,
        w: u64,
        lane: &str,
        field: SampleField,
        value: f64,
    ) -> Result<()> {
        let record = self.writable(w)?;
        if let Some(metrics) = record.per_lane.get_mut(lane) {
            metrics.samples_mut(field).push(value);
        }
        Ok(())
    }

    /// Records the chosen turn for a vehicle once per window; repeated calls
    /// for the same vehicle are rejected until it leaves the inbound lanes.
    pub fn record_turn(&mut self, w: u64, vehicle: &str, turn: Turn) -> Result<bool> {
        let record = self.writable(w)?;
        if !record.turning_vehicles_passed.insert(vehicle.to_string()) {
            return Ok(false);
        }
        *record.turning_vehicles.entry(turn).or_insert(0) += 1;
        Ok(true)
    }

    /// Drops vehicles from the turning set once they are no longer on any
    /// inbound road of this junction; keeps the id sets bounded.
    pub fn evict_departed(
        &mut self,
        w: u64,
        vehicle_roads: &HashMap<String, String>,
        inbound_roads: &HashSet<String>,
    ) -> Result<()> {
        let record = self.writable(w)?;
        record.turning_vehicles_passed.retain(|veh| {
            vehicle_roads
                .get(veh)
                .map(|road| inbound_roads.contains(road))
                .unwrap_or(false)
        });
        Ok(())
    }

    /// Per-lane totals plus arithmetic means of the sample arrays, in lane
    /// order. Non-mutating and idempotent; valid on frozen windows.
    pub fn summarise(&self, w: u64) -> Result<Vec<LaneSummary>> {
        let record = self.window(w).ok_or(TwinError::WindowFrozen {
            window: w,
            current: self.current.unwrap_or(0),
        })?;
        let mut out = Vec::with_capacity(self.lanes.len());
        for lane in &self.lanes {
            let metrics = match record.per_lane.get(lane) {
                Some(m) => m,
                None => continue,
            };
            debug_assert!(
                metrics.occupancy.len() == metrics.co2.len()
                    && metrics.co2.len() == metrics.noise.len(),
                "sample arrays diverged for lane {}",
                lane
            );
            out.push(LaneSummary {
                lane: lane.clone(),
                num_passing_veh: metrics.num_passing_veh,
                waiting_time_veh: metrics.waiting_time_veh,
                avg_occupancy: mean(&metrics.occupancy),
                avg_co2: mean(&metrics.co2),
                avg_co: mean(&metrics.co),
                avg_hc: mean(&metrics.hc),
                avg_pmx: mean(&metrics.pmx),
                avg_nox: mean(&metrics.nox),
                avg_noise: mean(&metrics.noise),
            });
        }
        Ok(out)
    }

    /// Synthesizes a frozen partial window from a neighbour's published
    /// summaries. Neighbour windows may arrive with gaps; ordering per
    /// neighbour is preserved by the bus.
    pub fn insert_summary_window(
        &mut self,
        w: u64,
        date_info: Option<DateInfo>,
        actual_program: &str,
        summaries: &[LaneSummary],
    ) {
        let mut record = WindowRecord::default();
        record.date_info = date_info;
        record.actual_program = actual_program.to_string();
        record.frozen = true;
        for summary in summaries {
            let metrics = LaneMetrics {
                num_passing_veh: summary.num_passing_veh,
                waiting_time_veh: summary.waiting_time_veh,
                last_waiting_reading: 0.0,
                occupancy: vec![summary.avg_occupancy],
                co2: vec![summary.avg_co2],
                co: vec![summary.avg_co],
                hc: vec![summary.avg_hc],
                pmx: vec![summary.avg_pmx],
                nox: vec![summary.avg_nox],
                noise: vec![summary.avg_noise],
            };
            record.per_lane.insert(summary.lane.clone(), metrics);
            if !self.lanes.contains(&summary.lane) {
                self.lanes.push(summary.lane.clone());
            }
        }
        self.windows.retain(|(idx, _)| *idx != w);
        self.windows.push_back((w, record));
        while self.windows.len() > self.capacity {
            self.windows.pop_front();
        }
        self.current = self.windows.iter().map(|(idx, _)| *idx).max();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> ContextualHistory {
        ContextualHistory::new("c3", vec!["n1_c3_0".into(), "e1_c3_0".into()], 4)
    }

    #[test]
    fn open_requires_monotonic_windows() {
        let mut h = history();
        assert!(h.open_window(1, "p1").is_err());
        h.open_window(0, "p1").unwrap();
        assert!(h.open_window(2, "p1").is_err());
        h.open_window(1, "p1").unwrap();
        assert_eq!(h.current_window(), Some(1));
    }

    #[test]
    fn passing_vehicles_are_deduplicated() {
        let mut h = history();
        h.open_window(0, "p1").unwrap();
        let ids = vec!["v1".to_string(), "v2".to_string()];
        assert_eq!(h.add_passing(0, "n1_c3_0", &ids).unwrap(), 2);
        // Same detector reading again: nothing new.
        assert_eq!(h.add_passing(0, "n1_c3_0", &ids).unwrap(), 0);
        // Same vehicle showing up on another lane is not recounted.
        assert_eq!(h.add_passing(0, "e1_c3_0", &ids[..1].to_vec()).unwrap(), 0);
        let record = h.window(0).unwrap();
        assert_eq!(record.num_passing("n1_c3_0"), 2);
        let total: u64 = record.num_passing("n1_c3_0") + record.num_passing("e1_c3_0");
        assert_eq!(record.vehicles_passed_count() as u64, total);
    }

    #[test]
    fn waiting_time_follows_monotonic_rule() {
        // Readings 30 -> 12 -> 18 -> 5 bank 30 + 18 = 48.
        let mut h = history();
        h.open_window(0, "p1").unwrap();
        h.add_waiting(0, "n1_c3_0", 30.0).unwrap(); // seed previous reading
        h.add_waiting(0, "n1_c3_0", 12.0).unwrap(); // 30 > 12: +30
        h.add_waiting(0, "n1_c3_0", 18.0).unwrap(); // 12 < 18: nothing
        h.add_waiting(0, "n1_c3_0", 5.0).unwrap(); // 18 > 5: +18
        let lane = h.window(0).unwrap().lane("n1_c3_0").unwrap();
        assert!((lane.waiting_time_veh - 48.0).abs() < 1e-9);
    }

    #[test]
    fn turn_recording_rejects_duplicates() {
        let mut h = history();
        h.open_window(0, "p1").unwrap();
        assert!(h.record_turn(0, "v9", Turn::Left).unwrap());
        for _ in 0..10 {
            assert!(!h.record_turn(0, "v9", Turn::Left).unwrap());
        }
        let record = h.window(0).unwrap();
        assert_eq!(record.turning_count(Turn::Left), 1);
        assert_eq!(record.turning_total(), 1);
    }

    #[test]
    fn turn_split_matches_recorded_set() {
        let mut h = history();
        h.open_window(0, "p1").unwrap();
        h.record_turn(0, "a", Turn::Left).unwrap();
        h.record_turn(0, "b", Turn::Right).unwrap();
        h.record_turn(0, "c", Turn::Forward).unwrap();
        h.record_turn(0, "d", Turn::Forward).unwrap();
        let record = h.window(0).unwrap();
        assert_eq!(record.turning_total(), 4);
        assert!(record.is_turn_recorded("a"));
    }

    #[test]
    fn eviction_frees_vehicles_that_left_inbound_lanes() {
        let mut h = history();
        h.open_window(0, "p1").unwrap();
        h.record_turn(0, "v1", Turn::Left).unwrap();
        h.record_turn(0, "v2", Turn::Right).unwrap();
        let mut roads = HashMap::new();
        roads.insert("v1".to_string(), "n1_c3".to_string());
        roads.insert("v2".to_string(), "far_away".to_string());
        let inbound: HashSet<String> = ["n1_c3".to_string()].into_iter().collect();
        h.evict_departed(0, &roads, &inbound).unwrap();
        let record = h.window(0).unwrap();
        assert!(record.is_turn_recorded("v1"));
        assert!(!record.is_turn_recorded("v2"));
        // Counters keep the turns already taken.
        assert_eq!(record.turning_total(), 2);
    }

    #[test]
    fn summarise_means_and_idempotence() {
        let mut h = history();
        h.open_window(0, "p1").unwrap();
        for v in [0.2, 0.4, 0.6] {
            h.append_lane_sample(0, "n1_c3_0", SampleField::Occupancy, v)
                .unwrap();
            h.append_lane_sample(0, "n1_c3_0", SampleField::Co2, v * 10.0)
                .unwrap();
            for field in [
                SampleField::Co,
                SampleField::Hc,
                SampleField::Pmx,
                SampleField::Nox,
                SampleField::Noise,
            ] {
                h.append_lane_sample(0, "n1_c3_0", field, 1.0).unwrap();
            }
        }
        let first = h.summarise(0).unwrap();
        assert!((first[0].avg_occupancy - 0.4).abs() < 1e-9);
        assert!((first[0].avg_co2 - 4.0).abs() < 1e-9);
        let second = h.summarise(0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn frozen_windows_reject_mutation() {
        let mut h = history();
        h.open_window(0, "p1").unwrap();
        h.freeze_window(0);
        h.open_window(1, "p1").unwrap();
        let err = h.add_waiting(0, "n1_c3_0", 3.0).unwrap_err();
        assert!(matches!(err, TwinError::WindowFrozen { window: 0, .. }));
        // Reading a past window is still fine.
        assert!(h.summarise(0).is_ok());
    }

    #[test]
    fn ring_evicts_old_windows() {
        let mut h = ContextualHistory::new("c3", vec!["l0".into()], 2);
        for w in 0..5 {
            h.open_window(w, "p1").unwrap();
            h.freeze_window(w);
        }
        assert!(h.window(0).is_none());
        assert!(h.window(2).is_none());
        assert!(h.window(3).is_some());
        assert!(h.window(4).is_some());
    }

    #[test]
    fn neighbour_summary_window_round_trips() {
        let mut h = ContextualHistory::new("c4", Vec::new(), 4);
        let summary = LaneSummary {
            lane: "c4_c3_0".into(),
            num_passing_veh: 40,
            waiting_time_veh: 120.0,
            avg_occupancy: 0.3,
            avg_co2: 1.0,
            avg_co: 0.5,
            avg_hc: 0.1,
            avg_pmx: 0.1,
            avg_nox: 0.2,
            avg_noise: 55.0,
        };
        h.insert_summary_window(7, None, "p2", std::slice::from_ref(&summary));
        assert_eq!(h.current_window(), Some(7));
        let back = h.summarise(7).unwrap();
        assert_eq!(back, vec![summary]);
        assert!(h.window(7).unwrap().is_frozen());
    }
}
