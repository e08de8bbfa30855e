use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::analyzer::TrafficAnalyzer;
use crate::bus::{
    topic, AnalysisMessage, BusClient, PredictionMessage, TrafficInfoMessage,
    TurnPredictionMessage,
};
use crate::errors::{Result, TwinError};
use crate::global_variables::{
    DB_WRITE_ATTEMPTS, DB_WRITE_BACKOFF_MS, DEFAULT_HISTORY_WINDOWS, TOPIC_TRAFFIC_ANALYSIS,
    TOPIC_TRAFFIC_INFO, TOPIC_TRAFFIC_PREDICTION, TOPIC_TURN_PREDICTION,
};
use crate::history::{ContextualHistory, DateInfo, SampleField};
use crate::kernel::SimulationKernel;
use crate::predictor::{TrafficPredictor, TurnPredictor};
use crate::strategy::{
    choose_program, AdaptationStrategy, Axis, ProgramTable, StrategyInputs,
};
use crate::topology::{LaneRelation, TopologyStore};
use crate::turns::Turn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Booting,
    Steady,
    Closing,
}

/// Per-light wiring the simulation loop hands to the agent constructor.
#[derive(Default)]
pub struct AgentOptions {
    pub strategy: Option<AdaptationStrategy>,
    pub table: Option<ProgramTable>,
    pub analyzer: Option<TrafficAnalyzer>,
    pub predictor: Option<TrafficPredictor>,
    pub turn_predictor: Option<TurnPredictor>,
    pub bus: Option<Box<dyn BusClient>>,
    pub history_windows: usize,
}

/// One adaptation agent per traffic light. Observes its inbound lanes every
/// tick, closes a temporal window every N cycles, and keeps partial
/// neighbour state fed in over the bus.
pub struct TrafficLightAgent {
    tl_id: String,
    state: AgentState,
    strategy: AdaptationStrategy,
    table: ProgramTable,
    history: ContextualHistory,
    neighbours: HashMap<String, ContextualHistory>,
    feeding_lanes: HashMap<String, Vec<(String, Axis)>>,
    ns_lanes: Vec<String>,
    ew_lanes: Vec<String>,
    inbound_lanes: Vec<String>,
    inbound_roads: HashSet<String>,
    detectors: Vec<(String, String)>,
    analyzer: Option<TrafficAnalyzer>,
    predictor: Option<TrafficPredictor>,
    turn_predictor: Option<TurnPredictor>,
    bus: Option<Box<dyn BusClient>>,
    current_program: String,
    window: u64,
}

/// Inbound lanes approach the junction either north-south or east-west,
/// judged by the dominant component of the lane's direction vector.
fn lane_axis(topology: &TopologyStore, lane: &LaneRelation) -> Axis {
    let (from, to) = match (topology.junction(&lane.from), topology.junction(&lane.to)) {
        (Some(f), Some(t)) => (f, t),
        _ => return Axis::NorthSouth,
    };
    let dx = (to.x - from.x).abs();
    let dy = (to.y - from.y).abs();
    if dy >= dx {
        Axis::NorthSouth
    } else {
        Axis::EastWest
    }
}

impl TrafficLightAgent {
    pub fn new(tl_id: &str, topology: &TopologyStore, options: AgentOptions) -> Result<Self> {
        if !topology
            .junction(tl_id)
            .map(|j| j.is_traffic_light())
            .unwrap_or(false)
        {
            return Err(TwinError::Config(format!(
                "'{}' is not a traffic light",
                tl_id
            )));
        }
        let inbound = topology.inbound_lanes(tl_id);
        let inbound_lanes: Vec<String> = inbound.iter().map(|l| l.lane_name.clone()).collect();
        let inbound_roads: HashSet<String> = inbound.iter().map(|l| l.edge.clone()).collect();
        let mut ns_lanes = Vec::new();
        let mut ew_lanes = Vec::new();
        for lane in &inbound {
            match lane_axis(topology, lane) {
                Axis::NorthSouth => ns_lanes.push(lane.lane_name.clone()),
                Axis::EastWest => ew_lanes.push(lane.lane_name.clone()),
            }
        }
        let detectors = topology
            .detectors_of(tl_id)
            .iter()
            .map(|d| (d.name.clone(), d.lane.clone()))
            .collect();
        // A neighbour feeds this junction through the first road of its
        // adjacency path; those lane counts blend into the matching axis.
        let mut feeding_lanes: HashMap<String, Vec<(String, Axis)>> = HashMap::new();
        for neighbour in topology.adjacent_traffic_lights(tl_id) {
            let first_hop = match topology
                .adjacency_rows(&neighbour.name)
                .iter()
                .find(|r| r.to == tl_id)
            {
                Some(row) => row.first_hop.clone(),
                None => continue,
            };
            let lanes: Vec<(String, Axis)> = topology
                .outbound_lanes(&neighbour.name)
                .into_iter()
                .filter(|l| l.edge == first_hop)
                .map(|l| (l.lane_name.clone(), lane_axis(topology, l)))
                .collect();
            feeding_lanes.insert(neighbour.name.clone(), lanes);
        }
        let capacity = if options.history_windows == 0 {
            DEFAULT_HISTORY_WINDOWS
        } else {
            options.history_windows
        };
        Ok(TrafficLightAgent {
            tl_id: tl_id.to_string(),
            state: AgentState::Booting,
            strategy: options.strategy.unwrap_or(AdaptationStrategy::Static),
            table: options.table.unwrap_or_default(),
            history: ContextualHistory::new(tl_id, inbound_lanes.clone(), capacity),
            neighbours: HashMap::new(),
            feeding_lanes,
            ns_lanes,
            ew_lanes,
            inbound_lanes,
            inbound_roads,
            detectors,
            analyzer: options.analyzer,
            predictor: options.predictor,
            turn_predictor: options.turn_predictor,
            bus: options.bus,
            current_program: String::new(),
            window: 0,
        })
    }

    pub fn tl_id(&self) -> &str {
        &self.tl_id
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn current_window(&self) -> u64 {
        self.window
    }

    pub fn current_program(&self) -> &str {
        &self.current_program
    }

    pub fn history(&self) -> &ContextualHistory {
        &self.history
    }

    /// Reads the starting program off the simulator, opens window 0 and
    /// subscribes to every adjacent light's window topic.
    pub fn boot(&mut self, kernel: &dyn SimulationKernel, date: Option<DateInfo>) -> Result<()> {
        debug_assert_eq!(self.state, AgentState::Booting);
        self.current_program = kernel.current_program(&self.tl_id)?;
        if self.table.programs.is_empty() {
            self.table = ProgramTable::from_programs(kernel.list_programs(&self.tl_id)?);
        }
        if let Some(bus) = self.bus.as_mut() {
            for neighbour in self.feeding_lanes.keys() {
                bus.subscribe(&topic(TOPIC_TRAFFIC_INFO, neighbour))?;
            }
            bus.connect()?;
        }
        self.history.open_window(0, &self.current_program)?;
        if let Some(date) = date {
            self.history.set_date(0, date)?;
        }
        self.state = AgentState::Steady;
        info!(
            "{}: booted with program {} ({} inbound lanes, {} neighbours)",
            self.tl_id,
            self.current_program,
            self.inbound_lanes.len(),
            self.feeding_lanes.len()
        );
        Ok(())
    }

    /// One simulation tick: purge departed vehicles, count detector
    /// crossings, re-read waiting time and sample occupancy and emissions.
    pub fn on_tick(
        &mut self,
        kernel: &dyn SimulationKernel,
        vehicle_roads: &HashMap<String, String>,
    ) -> Result<()> {
        debug_assert_eq!(self.state, AgentState::Steady);
        let w = self.window;
        self.history
            .evict_departed(w, vehicle_roads, &self.inbound_roads)?;
        for (detector, lane) in &self.detectors {
            let ids = kernel.loop_vehicle_ids(detector)?;
            if !ids.is_empty() {
                self.history.add_passing(w, lane, &ids)?;
            }
        }
        for lane in &self.inbound_lanes {
            self.history
                .add_waiting(w, lane, kernel.lane_waiting_time(lane)?)?;
            self.history
                .append_lane_sample(w, lane, SampleField::Occupancy, kernel.lane_occupancy(lane)?)?;
            let e = kernel.lane_emissions(lane)?;
            self.history.append_lane_sample(w, lane, SampleField::Co2, e.co2)?;
            self.history.append_lane_sample(w, lane, SampleField::Co, e.co)?;
            self.history.append_lane_sample(w, lane, SampleField::Hc, e.hc)?;
            self.history.append_lane_sample(w, lane, SampleField::Pmx, e.pmx)?;
            self.history.append_lane_sample(w, lane, SampleField::Nox, e.nox)?;
            self.history
                .append_lane_sample(w, lane, SampleField::Noise, e.noise)?;
        }
        Ok(())
    }

    /// Whether the vehicle's turn was already counted this window; the
    /// router checks this before re-rolling a turn.
    pub fn is_turn_recorded(&self, vehicle: &str) -> bool {
        self.history
            .window(self.window)
            .map(|r| r.is_turn_recorded(vehicle))
            .unwrap_or(false)
    }

    pub fn record_turn(&mut self, vehicle: &str, turn: Turn) -> Result<bool> {
        self.history.record_turn(self.window, vehicle, turn)
    }

    fn apply_neighbour_messages(&mut self) {
        let messages = match self.bus.as_mut() {
            Some(bus) => bus.drain(),
            None => return,
        };
        for (msg_topic, payload) in messages {
            let msg: TrafficInfoMessage = match serde_json::from_str(&payload) {
                Ok(m) => m,
                Err(err) => {
                    warn!("{}: dropping malformed payload on {}: {}", self.tl_id, msg_topic, err);
                    continue;
                }
            };
            let slot = self
                .neighbours
                .entry(msg.tl_id.clone())
                .or_insert_with(|| {
                    ContextualHistory::new(&msg.tl_id, Vec::new(), DEFAULT_HISTORY_WINDOWS)
                });
            slot.insert_summary_window(
                msg.temporal_window,
                msg.date_info,
                &msg.actual_program,
                &msg.info,
            );
        }
    }

    fn counts(&self, w: u64) -> (u64, u64) {
        let record = match self.history.window(w) {
            Some(r) => r,
            None => return (0, 0),
        };
        let ns = self.ns_lanes.iter().map(|l| record.num_passing(l)).sum();
        let ew = self.ew_lanes.iter().map(|l| record.num_passing(l)).sum();
        (ns, ew)
    }

    fn publish(&mut self, msg_topic: &str, payload: String) {
        if let Some(bus) = self.bus.as_mut() {
            if let Err(err) = bus.publish(msg_topic, &payload) {
                warn!("{}: publish to {} failed: {}", self.tl_id, msg_topic, err);
            }
        }
    }

    fn publish_side_channels(&mut self, w: u64, date: Option<DateInfo>) {
        let (ns, ew) = self.counts(w);
        let mut outbox: Vec<(String, String)> = Vec::new();
        if let Some(analyzer) = self.analyzer.as_ref() {
            let msg = AnalysisMessage {
                tl_id: self.tl_id.clone(),
                temporal_window: w,
                traffic_type: analyzer.traffic_type(ns, ew),
            };
            if let Ok(payload) = serde_json::to_string(&msg) {
                outbox.push((topic(TOPIC_TRAFFIC_ANALYSIS, &msg.tl_id), payload));
            }
        }
        if let (Some(predictor), Some(date)) = (self.predictor.as_ref(), date) {
            match predictor.predict_for_window(&date, Some((ns, ew)), 0) {
                Ok(predicted_type) => {
                    let msg = PredictionMessage {
                        tl_id: self.tl_id.clone(),
                        temporal_window: w,
                        predicted_type,
                    };
                    if let Ok(payload) = serde_json::to_string(&msg) {
                        outbox.push((topic(TOPIC_TRAFFIC_PREDICTION, &msg.tl_id), payload));
                    }
                }
                Err(err) => debug!("{}: traffic prediction skipped: {}", self.tl_id, err),
            }
        }
        if let (Some(turn_predictor), Some(date)) = (self.turn_predictor.as_ref(), date) {
            for road in &self.inbound_roads {
                match turn_predictor.predict(road, &date, 0) {
                    Ok(probability) => {
                        let msg = TurnPredictionMessage {
                            tl_id: self.tl_id.clone(),
                            temporal_window: w,
                            road: road.clone(),
                            probability,
                        };
                        if let Ok(payload) = serde_json::to_string(&msg) {
                            outbox.push((topic(TOPIC_TURN_PREDICTION, &msg.tl_id), payload));
                        }
                    }
                    Err(err) => debug!("{}: turn prediction skipped: {}", self.tl_id, err),
                }
            }
        }
        for (msg_topic, payload) in outbox {
            self.publish(&msg_topic, payload);
        }
    }

    fn persist(&self, topology: &mut TopologyStore, w: u64, summaries: &[crate::history::LaneSummary]) {
        let mut backoff = DB_WRITE_BACKOFF_MS;
        for attempt in 1..=DB_WRITE_ATTEMPTS {
            match topology.update_lane_metrics(&self.tl_id, w, summaries) {
                Ok(()) => break,
                Err(TwinError::TopologyUnavailable(reason)) if attempt < DB_WRITE_ATTEMPTS => {
                    warn!(
                        "{}: topology write attempt {} failed: {}",
                        self.tl_id, attempt, reason
                    );
                    thread::sleep(Duration::from_millis(backoff));
                    backoff *= 2;
                }
                Err(err) => {
                    warn!("{}: dropping window {} write-back: {}", self.tl_id, w, err);
                    break;
                }
            }
        }
        if let Err(err) = topology.update_tl_program(&self.tl_id, &self.current_program) {
            warn!("{}: program write-back failed: {}", self.tl_id, err);
        }
    }

    /// Window close: absorb neighbour state, pick the next program,
    /// summarise, publish, persist, then advance to the next window. The
    /// sequence is total-ordered; window w is published before w+1 opens.
    pub fn close_window(
        &mut self,
        kernel: &mut dyn SimulationKernel,
        topology: &mut TopologyStore,
        next_date: Option<DateInfo>,
    ) -> Result<()> {
        debug_assert_eq!(self.state, AgentState::Steady);
        let w = self.window;
        self.apply_neighbour_messages();

        let date = self.history.window(w).and_then(|r| r.date_info);
        let inputs = StrategyInputs {
            history: &self.history,
            neighbours: &self.neighbours,
            window: w,
            current_program: &self.current_program,
            ns_lanes: &self.ns_lanes,
            ew_lanes: &self.ew_lanes,
            feeding_lanes: &self.feeding_lanes,
            analyzer: self.analyzer.as_ref(),
            predictor: self.predictor.as_ref(),
            date,
        };
        let chosen = choose_program(self.strategy, &inputs, &self.table);
        if chosen != self.current_program {
            // A refused program switch is fatal for the whole loop.
            kernel.set_program(&self.tl_id, &chosen)?;
            info!("{}: window {} switches {} -> {}", self.tl_id, w, self.current_program, chosen);
            self.current_program = chosen;
        }

        let summaries = self.history.summarise(w)?;
        let msg = TrafficInfoMessage {
            tl_id: self.tl_id.clone(),
            temporal_window: w,
            date_info: date,
            actual_program: self
                .history
                .window(w)
                .map(|r| r.actual_program.clone())
                .unwrap_or_default(),
            info: summaries.clone(),
        };
        if let Ok(payload) = serde_json::to_string(&msg) {
            let info_topic = topic(TOPIC_TRAFFIC_INFO, &self.tl_id);
            self.publish(&info_topic, payload);
        }
        self.publish_side_channels(w, date);

        self.persist(topology, w, &summaries);

        self.history.freeze_window(w);
        self.window = w + 1;
        self.history.open_window(self.window, &self.current_program)?;
        if let Some(date) = next_date {
            self.history.set_date(self.window, date)?;
        }
        Ok(())
    }

    /// Stop: the open window is closed with whatever was collected, then
    /// the bus client shuts down.
    pub fn shutdown(
        &mut self,
        kernel: &mut dyn SimulationKernel,
        topology: &mut TopologyStore,
    ) -> Result<()> {
        if self.state == AgentState::Steady {
            self.close_window(kernel, topology, None)?;
        }
        if let Some(bus) = self.bus.as_mut() {
            bus.close();
        }
        self.state = AgentState::Closing;
        Ok(())
    }
}
