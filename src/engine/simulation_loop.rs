use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::agent::TrafficLightAgent;
use crate::errors::Result;
use crate::global_variables::CYCLE_SECONDS;
use crate::history::DateInfo;
use crate::kernel::SimulationKernel;
use crate::predictor::TurnPredictor;
use crate::time_pattern::TimePattern;
use crate::topology::TopologyStore;
use crate::turns::{TurnProbability, TurnRouter};

/// Why the main loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The calendar ran out.
    CalendarExhausted,
    /// The kernel reported no more expected vehicles.
    VehiclesDrained,
    /// The stop flag was raised.
    Stopped,
}

/// Owner of the kernel and the clock. Strictly serial: every tick steps the
/// simulator once, routes turns, feeds each agent, and closes windows on
/// cycle boundaries.
pub struct SimulationLoop {
    kernel: Box<dyn SimulationKernel>,
    topology: TopologyStore,
    agents: Vec<TrafficLightAgent>,
    router: Option<TurnRouter>,
    /// Per-TL predictors whose output overrides the router's turn table at
    /// each window open.
    turn_predictors: HashMap<String, TurnPredictor>,
    time_pattern: TimePattern,
    window_seconds: u64,
    timestep: u64,
    stop: Arc<AtomicBool>,
}

impl SimulationLoop {
    pub fn new(
        kernel: Box<dyn SimulationKernel>,
        topology: TopologyStore,
        time_pattern: TimePattern,
        temporal_window_cycles: u64,
    ) -> Self {
        SimulationLoop {
            kernel,
            topology,
            agents: Vec::new(),
            router: None,
            turn_predictors: HashMap::new(),
            time_pattern,
            window_seconds: temporal_window_cycles.max(1) * CYCLE_SECONDS,
            timestep: 0,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn add_agent(&mut self, agent: TrafficLightAgent) {
        self.agents.push(agent);
    }

    pub fn set_router(&mut self, router: TurnRouter) {
        self.router = Some(router);
    }

    pub fn add_turn_predictor(&mut self, tl: &str, predictor: TurnPredictor) {
        self.turn_predictors.insert(tl.to_string(), predictor);
    }

    /// Shared flag a signal handler raises to end the run after the
    /// current tick.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    pub fn topology(&self) -> &TopologyStore {
        &self.topology
    }

    pub fn agents(&self) -> &[TrafficLightAgent] {
        &self.agents
    }

    fn vehicle_roads(&self) -> Result<HashMap<String, String>> {
        let mut roads = HashMap::new();
        for vehicle in self.kernel.vehicle_ids()? {
            let road = self.kernel.vehicle_road(&vehicle)?;
            roads.insert(vehicle, road);
        }
        Ok(roads)
    }

    /// Replaces the router's half-hour turn table with the predictors'
    /// output for the coming window; roads without a prediction fall back
    /// to the table.
    fn install_turn_overrides(&mut self, date: Option<DateInfo>) {
        let (router, date) = match (self.router.as_mut(), date) {
            (Some(r), Some(d)) => (r, d),
            _ => return,
        };
        if self.turn_predictors.is_empty() {
            return;
        }
        let mut overrides: HashMap<String, TurnProbability> = HashMap::new();
        for (tl, predictor) in &self.turn_predictors {
            for lane in self.topology.inbound_lanes(tl) {
                if overrides.contains_key(&lane.edge) {
                    continue;
                }
                match predictor.predict(&lane.edge, &date, 0) {
                    Ok(probs) => {
                        overrides.insert(lane.edge.clone(), probs);
                    }
                    Err(err) => {
                        warn!("{}: no turn prediction for {}: {}", tl, lane.edge, err)
                    }
                }
            }
        }
        router.pattern_mut().set_window_overrides(overrides);
    }

    fn route_turns(&mut self) -> Result<()> {
        let events = match self.router.as_mut() {
            Some(router) => {
                let agents = &self.agents;
                let is_recorded = |tl: &str, vehicle: &str| {
                    agents
                        .iter()
                        .find(|a| a.tl_id() == tl)
                        .map(|a| a.is_turn_recorded(vehicle))
                        .unwrap_or(false)
                };
                router.process_step(
                    self.kernel.as_mut(),
                    &self.topology,
                    self.timestep,
                    is_recorded,
                )?
            }
            None => return Ok(()),
        };
        for event in events {
            if let Some(agent) = self.agents.iter_mut().find(|a| a.tl_id() == event.tl) {
                agent.record_turn(&event.vehicle, event.turn)?;
            }
        }
        Ok(())
    }

    fn close_windows(&mut self) -> Result<()> {
        let next_date = self.time_pattern.date_at(self.timestep);
        for agent in &mut self.agents {
            agent.close_window(self.kernel.as_mut(), &mut self.topology, next_date)?;
        }
        self.install_turn_overrides(next_date);
        Ok(())
    }

    /// Runs until the calendar ends, the kernel drains, or stop is raised.
    /// The open window is always closed before returning.
    pub fn run(&mut self, kernel_args: &[String]) -> Result<LoopOutcome> {
        self.kernel.start(kernel_args)?;
        let boot_date = self.time_pattern.date_at(0);
        for agent in &mut self.agents {
            agent.boot(self.kernel.as_ref(), boot_date)?;
        }
        self.install_turn_overrides(boot_date);
        let total_steps = self.time_pattern.total_seconds();
        info!(
            "running {} agents for up to {} steps ({}s windows)",
            self.agents.len(),
            total_steps,
            self.window_seconds
        );

        let outcome = loop {
            if self.stop.load(Ordering::SeqCst) {
                break LoopOutcome::Stopped;
            }
            if self.timestep >= total_steps {
                break LoopOutcome::CalendarExhausted;
            }
            if self.timestep > 0 && self.kernel.expected_vehicles()? == 0 {
                break LoopOutcome::VehiclesDrained;
            }
            self.kernel.step()?;
            self.route_turns()?;
            let roads = self.vehicle_roads()?;
            for agent in &mut self.agents {
                agent.on_tick(self.kernel.as_ref(), &roads)?;
            }
            self.timestep += 1;
            if self.timestep % self.window_seconds == 0 {
                self.close_windows()?;
            }
        };

        for agent in &mut self.agents {
            agent.shutdown(self.kernel.as_mut(), &mut self.topology)?;
        }
        self.kernel.close()?;
        info!("loop finished after {} steps: {:?}", self.timestep, outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentOptions, TrafficLightAgent};
    use crate::kernel::ScriptedKernel;
    use crate::turns::pattern::TurnPatternTable;
    use crate::turns::TurnRouter;

    // Single light fed from the west, with north/east/south exits.
    fn crossroads() -> TopologyStore {
        let junctions = "node_id;node_x;node_y;node_type
w;-100;0;priority
c;0;0;traffic_light
e;100;0;priority
n;0;100;priority
s;0;-100;priority
";
        let edges = "edge_id;edge_from;edge_to;edge_numLanes
w_c;w;c;1
c_e;c;e;1
c_n;c;n;1
c_s;c;s;1
";
        TopologyStore::load_topology(edges.as_bytes(), junctions.as_bytes()).unwrap()
    }

    fn scripted(topology: &TopologyStore) -> ScriptedKernel {
        let mut kernel = ScriptedKernel::new();
        kernel.add_traffic_light("c", &["p1", "p2", "p3"], "p2");
        for detector in topology.detectors_of("c") {
            kernel.add_loop(&detector.name, &detector.lane);
        }
        kernel
    }

    fn one_day_pattern() -> TimePattern {
        TimePattern::from_date_range("01/03/2021-01/03/2021").unwrap()
    }

    #[test]
    fn windows_close_on_cycle_boundaries() {
        let topology = crossroads();
        let mut kernel = scripted(&topology);
        kernel.set_expected_vehicles(1); // never drains
        let mut looped = SimulationLoop::new(
            Box::new(kernel),
            topology.clone(),
            one_day_pattern(),
            1, // 90-second windows
        );
        let agent = TrafficLightAgent::new("c", &topology, AgentOptions::default()).unwrap();
        looped.add_agent(agent);
        let outcome = looped.run(&[]).unwrap();
        assert_eq!(outcome, LoopOutcome::CalendarExhausted);
        assert_eq!(looped.timestep(), 86_400);
        // 960 in-loop closes plus the final partial window at shutdown.
        assert_eq!(looped.agents()[0].current_window(), 961);
    }

    #[test]
    fn stop_flag_ends_the_run_with_a_closed_window() {
        let topology = crossroads();
        let mut kernel = scripted(&topology);
        kernel.set_expected_vehicles(1);
        let mut looped =
            SimulationLoop::new(Box::new(kernel), topology.clone(), one_day_pattern(), 1);
        let agent = TrafficLightAgent::new("c", &topology, AgentOptions::default()).unwrap();
        looped.add_agent(agent);
        looped.stop_handle().store(true, Ordering::SeqCst);
        let outcome = looped.run(&[]).unwrap();
        assert_eq!(outcome, LoopOutcome::Stopped);
        assert_eq!(looped.timestep(), 0);
        assert!(looped.agents()[0].history().window(0).unwrap().is_frozen());
    }

    #[test]
    fn turn_events_land_in_agent_histories() {
        let topology = crossroads();
        let mut kernel = scripted(&topology);
        kernel.add_vehicle("v1", "default", "w_c", &["w_c", "c_e"]);
        kernel.script_route("w_c", "c_n", &["w_c", "c_n"]);
        let mut looped =
            SimulationLoop::new(Box::new(kernel), topology.clone(), one_day_pattern(), 1);
        let agent = TrafficLightAgent::new("c", &topology, AgentOptions::default()).unwrap();
        looped.add_agent(agent);
        let csv = "timestep_begin;road;prob_right;prob_left;prob_forward\n0;w_c;0.0;1.0;0.0\n";
        let pattern = TurnPatternTable::from_reader(csv.as_bytes()).unwrap();
        looped.set_router(TurnRouter::new(pattern, false, 7));

        looped.kernel.start(&[]).unwrap();
        let boot_date = looped.time_pattern.date_at(0);
        for agent in &mut looped.agents {
            agent.boot(looped.kernel.as_ref(), boot_date).unwrap();
        }
        looped.route_turns().unwrap();
        let record = looped.agents()[0].history().window(0).unwrap();
        assert_eq!(record.turning_count(crate::turns::Turn::Left), 1);
        assert_eq!(record.turning_total(), 1);
        // The same vehicle is not re-drawn while it stays on the approach.
        looped.route_turns().unwrap();
        let record = looped.agents()[0].history().window(0).unwrap();
        assert_eq!(record.turning_total(), 1);
    }

    #[test]
    fn drained_kernel_ends_the_run() {
        let topology = crossroads();
        let kernel = scripted(&topology); // no vehicles, expected 0
        let mut looped =
            SimulationLoop::new(Box::new(kernel), topology.clone(), one_day_pattern(), 1);
        let agent = TrafficLightAgent::new("c", &topology, AgentOptions::default()).unwrap();
        looped.add_agent(agent);
        let outcome = looped.run(&[]).unwrap();
        assert_eq!(outcome, LoopOutcome::VehiclesDrained);
        // The partial window was still closed on shutdown.
        assert!(looped.agents()[0].history().window(0).unwrap().is_frozen());
    }
}
