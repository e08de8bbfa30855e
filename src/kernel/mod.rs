pub mod scripted;

pub use scripted::ScriptedKernel;

use crate::errors::Result;

/// One reading of the six emission measures a lane reports per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Emissions {
    pub co2: f64,
    pub co: f64,
    pub hc: f64,
    pub pmx: f64,
    pub nox: f64,
    pub noise: f64,
}

/// Abstract surface of the external traffic microsimulator. The control
/// plane only ever talks to the simulator through these operations; wiring
/// up a real traci-style backend means implementing this trait. `Send` lets
/// the binary hand the whole loop to a blocking worker thread.
pub trait SimulationKernel: Send {
    fn start(&mut self, args: &[String]) -> Result<()>;
    fn step(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    /// Vehicles the scenario still expects to insert; 0 ends the main loop.
    fn expected_vehicles(&self) -> Result<u64>;

    fn list_traffic_lights(&self) -> Result<Vec<String>>;
    fn current_program(&self, tl: &str) -> Result<String>;
    fn set_program(&mut self, tl: &str, program: &str) -> Result<()>;
    fn list_programs(&self, tl: &str) -> Result<Vec<String>>;

    fn inductionloops(&self) -> Result<Vec<String>>;
    /// Vehicle ids that crossed the loop during the last tick.
    fn loop_vehicle_ids(&self, loop_id: &str) -> Result<Vec<String>>;
    fn loop_lane(&self, loop_id: &str) -> Result<String>;

    fn lane_waiting_time(&self, lane: &str) -> Result<f64>;
    fn lane_length(&self, lane: &str) -> Result<f64>;
    fn lane_max_speed(&self, lane: &str) -> Result<f64>;
    fn lane_occupancy(&self, lane: &str) -> Result<f64>;
    fn lane_emissions(&self, lane: &str) -> Result<Emissions>;

    fn vehicle_ids(&self) -> Result<Vec<String>>;
    /// The road (edge) the vehicle currently drives on. Internal junction
    /// lanes are prefixed with ':'.
    fn vehicle_road(&self, vehicle: &str) -> Result<String>;
    fn vehicle_route(&self, vehicle: &str) -> Result<Vec<String>>;
    fn vehicle_route_index(&self, vehicle: &str) -> Result<usize>;
    fn vehicle_type(&self, vehicle: &str) -> Result<String>;
    fn set_vehicle_route(&mut self, vehicle: &str, edges: Vec<String>) -> Result<()>;
    /// Route between two edges for a vehicle type; empty when none exists.
    fn find_route(&self, from: &str, to: &str, vtype: &str) -> Result<Vec<String>>;
    /// The next traffic light ahead of the vehicle, if any.
    fn next_tl(&self, vehicle: &str) -> Result<Option<String>>;
}
