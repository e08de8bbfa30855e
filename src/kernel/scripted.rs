use std::collections::HashMap;

use crate::errors::{Result, TwinError};
use crate::kernel::{Emissions, SimulationKernel};

#[derive(Debug, Clone, Default)]
struct ScriptedVehicle {
    road: String,
    route: Vec<String>,
    route_index: usize,
    vtype: String,
    next_tl: Option<String>,
}

/// Deterministic in-process kernel. Tests (and local demo runs) script the
/// readings between steps; the control plane drives it through the same
/// trait a real microsimulator would sit behind.
#[derive(Debug, Clone, Default)]
pub struct ScriptedKernel {
    tick: u64,
    started: bool,
    expected: u64,
    traffic_lights: Vec<String>,
    programs: HashMap<String, String>,
    program_lists: HashMap<String, Vec<String>>,
    loops: Vec<String>,
    loop_lanes: HashMap<String, String>,
    loop_vehicles: HashMap<String, Vec<String>>,
    lane_waiting: HashMap<String, f64>,
    lane_length: HashMap<String, f64>,
    lane_max_speed: HashMap<String, f64>,
    lane_occupancy: HashMap<String, f64>,
    lane_emissions: HashMap<String, Emissions>,
    vehicles: HashMap<String, ScriptedVehicle>,
    vehicle_order: Vec<String>,
    routes: HashMap<(String, String), Vec<String>>,
    /// Every (tl, program) pair passed to set_program, for assertions.
    pub program_switches: Vec<(String, String)>,
    /// Every route rewrite applied, for assertions.
    pub route_rewrites: Vec<(String, Vec<String>)>,
}

impl ScriptedKernel {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn add_traffic_light(&mut self, tl: &str, programs: &[&str], current: &str) {
        self.traffic_lights.push(tl.to_string());
        self.programs.insert(tl.to_string(), current.to_string());
        self.program_lists.insert(
            tl.to_string(),
            programs.iter().map(|p| p.to_string()).collect(),
        );
    }

    pub fn add_loop(&mut self, loop_id: &str, lane: &str) {
        self.loops.push(loop_id.to_string());
        self.loop_lanes.insert(loop_id.to_string(), lane.to_string());
    }

    pub fn set_loop_vehicles(&mut self, loop_id: &str, vehicles: &[&str]) {
        self.loop_vehicles.insert(
            loop_id.to_string(),
            vehicles.iter().map(|v| v.to_string()).collect(),
        );
    }

    pub fn set_lane_reading(&mut self, lane: &str, waiting: f64, occupancy: f64, em: Emissions) {
        self.lane_waiting.insert(lane.to_string(), waiting);
        self.lane_occupancy.insert(lane.to_string(), occupancy);
        self.lane_emissions.insert(lane.to_string(), em);
    }

    pub fn set_lane_geometry(&mut self, lane: &str, length: f64, max_speed: f64) {
        self.lane_length.insert(lane.to_string(), length);
        self.lane_max_speed.insert(lane.to_string(), max_speed);
    }

    pub fn add_vehicle(&mut self, id: &str, vtype: &str, road: &str, route: &[&str]) {
        self.vehicle_order.push(id.to_string());
        self.vehicles.insert(
            id.to_string(),
            ScriptedVehicle {
                road: road.to_string(),
                route: route.iter().map(|e| e.to_string()).collect(),
                route_index: 0,
                vtype: vtype.to_string(),
                next_tl: None,
            },
        );
    }

    pub fn set_vehicle_road(&mut self, id: &str, road: &str) {
        if let Some(v) = self.vehicles.get_mut(id) {
            v.road = road.to_string();
        }
    }

    pub fn remove_vehicle(&mut self, id: &str) {
        self.vehicles.remove(id);
        self.vehicle_order.retain(|v| v != id);
    }

    pub fn set_next_tl(&mut self, id: &str, tl: Option<&str>) {
        if let Some(v) = self.vehicles.get_mut(id) {
            v.next_tl = tl.map(|t| t.to_string());
        }
    }

    pub fn script_route(&mut self, from: &str, to: &str, route: &[&str]) {
        self.routes.insert(
            (from.to_string(), to.to_string()),
            route.iter().map(|e| e.to_string()).collect(),
        );
    }

    pub fn set_expected_vehicles(&mut self, expected: u64) {
        self.expected = expected;
    }

    fn vehicle(&self, id: &str) -> Result<&ScriptedVehicle> {
        self.vehicles
            .get(id)
            .ok_or_else(|| TwinError::Kernel(format!("unknown vehicle '{}'", id)))
    }
}

impl SimulationKernel for ScriptedKernel {
    fn start(&mut self, _args: &[String]) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        if !self.started {
            return Err(TwinError::Kernel("step before start".into()));
        }
        self.tick += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn expected_vehicles(&self) -> Result<u64> {
        Ok(self.expected + self.vehicles.len() as u64)
    }

    fn list_traffic_lights(&self) -> Result<Vec<String>> {
        Ok(self.traffic_lights.clone())
    }

    fn current_program(&self, tl: &str) -> Result<String> {
        self.programs
            .get(tl)
            .cloned()
            .ok_or_else(|| TwinError::Kernel(format!("unknown traffic light '{}'", tl)))
    }

    fn set_program(&mut self, tl: &str, program: &str) -> Result<()> {
        match self.programs.get_mut(tl) {
            Some(current) => {
                *current = program.to_string();
                self.program_switches
                    .push((tl.to_string(), program.to_string()));
                Ok(())
            }
            None => Err(TwinError::Kernel(format!("unknown traffic light '{}'", tl))),
        }
    }

    fn list_programs(&self, tl: &str) -> Result<Vec<String>> {
        self.program_lists
            .get(tl)
            .cloned()
            .ok_or_else(|| TwinError::Kernel(format!("unknown traffic light '{}'", tl)))
    }

    fn inductionloops(&self) -> Result<Vec<String>> {
        Ok(self.loops.clone())
    }

    fn loop_vehicle_ids(&self, loop_id: &str) -> Result<Vec<String>> {
        Ok(self.loop_vehicles.get(loop_id).cloned().unwrap_or_default())
    }

    fn loop_lane(&self, loop_id: &str) -> Result<String> {
        self.loop_lanes
            .get(loop_id)
            .cloned()
            .ok_or_else(|| TwinError::Kernel(format!("unknown loop '{}'", loop_id)))
    }

    fn lane_waiting_time(&self, lane: &str) -> Result<f64> {
        Ok(self.lane_waiting.get(lane).copied().unwrap_or(0.0))
    }

    fn lane_length(&self, lane: &str) -> Result<f64> {
        Ok(self.lane_length.get(lane).copied().unwrap_or(100.0))
    }

    fn lane_max_speed(&self, lane: &str) -> Result<f64> {
        Ok(self.lane_max_speed.get(lane).copied().unwrap_or(13.89))
    }

    fn lane_occupancy(&self, lane: &str) -> Result<f64> {
        Ok(self.lane_occupancy.get(lane).copied().unwrap_or(0.0))
    }

    fn lane_emissions(&self, lane: &str) -> Result<Emissions> {
        Ok(self.lane_emissions.get(lane).copied().unwrap_or_default())
    }

    fn vehicle_ids(&self) -> Result<Vec<String>> {
        Ok(self.vehicle_order.clone())
    }

    fn vehicle_road(&self, vehicle: &str) -> Result<String> {
        Ok(self.vehicle(vehicle)?.road.clone())
    }

    fn vehicle_route(&self, vehicle: &str) -> Result<Vec<String>> {
        Ok(self.vehicle(vehicle)?.route.clone())
    }

    fn vehicle_route_index(&self, vehicle: &str) -> Result<usize> {
        Ok(self.vehicle(vehicle)?.route_index)
    }

    fn vehicle_type(&self, vehicle: &str) -> Result<String> {
        Ok(self.vehicle(vehicle)?.vtype.clone())
    }

    fn set_vehicle_route(&mut self, vehicle: &str, edges: Vec<String>) -> Result<()> {
        match self.vehicles.get_mut(vehicle) {
            Some(v) => {
                v.route = edges.clone();
                v.route_index = 0;
                self.route_rewrites.push((vehicle.to_string(), edges));
                Ok(())
            }
            None => Err(TwinError::Kernel(format!("unknown vehicle '{}'", vehicle))),
        }
    }

    fn find_route(&self, from: &str, to: &str, _vtype: &str) -> Result<Vec<String>> {
        Ok(self
            .routes
            .get(&(from.to_string(), to.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn next_tl(&self, vehicle: &str) -> Result<Option<String>> {
        Ok(self.vehicle(vehicle)?.next_tl.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_requires_start() {
        let mut k = ScriptedKernel::new();
        assert!(k.step().is_err());
        k.start(&[]).unwrap();
        k.step().unwrap();
        assert_eq!(k.tick(), 1);
    }

    #[test]
    fn boxed_kernels_move_across_threads() {
        fn assert_send<T: Send>() {}
        assert_send::<Box<dyn SimulationKernel>>();
    }

    #[test]
    fn program_switches_are_recorded() {
        let mut k = ScriptedKernel::new();
        k.add_traffic_light("c3", &["p1", "p2", "p3"], "p2");
        k.set_program("c3", "p3").unwrap();
        assert_eq!(k.current_program("c3").unwrap(), "p3");
        assert_eq!(k.program_switches, vec![("c3".to_string(), "p3".to_string())]);
    }
}
