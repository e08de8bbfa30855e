use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::errors::Result;
use crate::kernel::SimulationKernel;
use crate::topology::TopologyStore;
use crate::turns::pattern::TurnPatternTable;
use crate::turns::Turn;

/// A turn assigned to a vehicle approaching a traffic light; the caller
/// records it on the owning agent's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnEvent {
    pub tl: String,
    pub vehicle: String,
    pub turn: Turn,
}

/// Per-step stochastic route rewriter. In observation mode (vehicles loaded
/// from a precomputed routes file) no route is touched; the already planned
/// next edge is matched against the legal turn edges instead.
pub struct TurnRouter {
    rng: SmallRng,
    pattern: TurnPatternTable,
    observe_only: bool,
}

impl TurnRouter {
    pub fn new(pattern: TurnPatternTable, observe_only: bool, seed: u64) -> Self {
        TurnRouter {
            rng: SmallRng::seed_from_u64(seed),
            pattern,
            observe_only,
        }
    }

    pub fn pattern_mut(&mut self) -> &mut TurnPatternTable {
        &mut self.pattern
    }

    /// Walks every vehicle on a non-internal road whose downstream junction
    /// is a traffic light, draws (or observes) a turn, rewrites the route
    /// when the simulator can produce one, and returns the events to record.
    /// `is_recorded` answers whether a vehicle already holds a turn at a
    /// traffic light for the current window.
    pub fn process_step<F>(
        &mut self,
        kernel: &mut dyn SimulationKernel,
        topology: &TopologyStore,
        timestep: u64,
        is_recorded: F,
    ) -> Result<Vec<TurnEvent>>
    where
        F: Fn(&str, &str) -> bool,
    {
        let mut events = Vec::new();
        for vehicle in kernel.vehicle_ids()? {
            let road = kernel.vehicle_road(&vehicle)?;
            if road.starts_with(':') {
                // internal junction lane
                continue;
            }
            let downstream = match topology.road_to_junction(&road) {
                Some(j) if j.is_traffic_light() => j.name.clone(),
                _ => continue,
            };
            if is_recorded(&downstream, &vehicle) {
                continue;
            }
            let event = if self.observe_only {
                self.observe_turn(kernel, topology, &road, &downstream, &vehicle)?
            } else {
                self.reroute(kernel, topology, timestep, &road, &downstream, &vehicle)?
            };
            if let Some(event) = event {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn reroute(
        &mut self,
        kernel: &mut dyn SimulationKernel,
        topology: &TopologyStore,
        timestep: u64,
        road: &str,
        tl: &str,
        vehicle: &str,
    ) -> Result<Option<TurnEvent>> {
        let probs = match self.pattern.probs_for(road, timestep) {
            Some(p) => p,
            None => return Ok(None),
        };
        let u: f64 = self.rng.random_range(0.0..1.0);
        let turn = probs.classify(u);
        let target = match topology.turn_target(road, turn) {
            Some(t) => t.to_string(),
            // Nothing to turn onto (outer corner): leave the route alone.
            None => return Ok(None),
        };
        let vtype = kernel.vehicle_type(vehicle)?;
        let route = kernel.find_route(road, &target, &vtype)?;
        if route.is_empty() {
            return Ok(None);
        }
        kernel.set_vehicle_route(vehicle, route)?;
        Ok(Some(TurnEvent {
            tl: tl.to_string(),
            vehicle: vehicle.to_string(),
            turn,
        }))
    }

    /// Compares the planned next edge against the legal turn edges of
    /// (current junction, downstream traffic light) and records the match.
    fn observe_turn(
        &mut self,
        kernel: &mut dyn SimulationKernel,
        topology: &TopologyStore,
        road: &str,
        tl: &str,
        vehicle: &str,
    ) -> Result<Option<TurnEvent>> {
        let route = kernel.vehicle_route(vehicle)?;
        let index = kernel.vehicle_route_index(vehicle)?;
        let next_edge = match route.get(index + 1) {
            Some(e) => e.as_str(),
            None => return Ok(None),
        };
        for (turn, target) in topology.turns_from(road) {
            if target == next_edge {
                return Ok(Some(TurnEvent {
                    tl: tl.to_string(),
                    vehicle: vehicle.to_string(),
                    turn,
                }));
            }
        }
        Ok(None)
    }
}
