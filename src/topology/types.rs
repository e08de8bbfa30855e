/// A junction is either plain or controlled by a traffic light.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JunctionKind {
    Plain,
    TrafficLight,
}

/// A node of the road graph. Cartesian coordinates come from the network
/// file; the geospatial pair is optional.
#[derive(Debug, Clone)]
pub struct Junction {
    pub name: String,
    pub x: f64,
    pub y: f64,
    /// (lat, lon) when the junctions file carries them.
    pub geo: Option<(f64, f64)>,
    pub kind: JunctionKind,
    /// Identifier of the signal program currently installed; traffic lights only.
    pub current_program: Option<String>,
}

impl Junction {
    pub fn is_traffic_light(&self) -> bool {
        self.kind == JunctionKind::TrafficLight
    }
}

/// Rolling per-window aggregates stored on a lane relation. Overwritten
/// wholesale by `update_lane_metrics`; `window` tags the write so repeating
/// the same window is idempotent.
#[derive(Debug, Clone, Default)]
pub struct LaneAverages {
    pub num_passing_veh: u64,
    pub waiting_time_veh: f64,
    pub occupancy: f64,
    pub co2: f64,
    pub co: f64,
    pub hc: f64,
    pub pmx: f64,
    pub nox: f64,
    pub noise: f64,
    pub window: Option<u64>,
}

/// A directed lane between two junctions. One relation per numeric lane
/// index of the parent edge (`{edge}_{i}`).
#[derive(Debug, Clone)]
pub struct LaneRelation {
    pub lane_name: String,
    /// Parent road / edge identifier.
    pub edge: String,
    pub from: String,
    pub to: String,
    pub distance: f64,
    pub slope: f64,
    pub max_speed: f64,
    pub averages: LaneAverages,
}

/// A virtual induction loop placed on an inbound lane of a traffic light.
#[derive(Debug, Clone)]
pub struct Detector {
    pub name: String,
    pub freq: u64,
    pub file: Option<String>,
    /// The downstream junction (`to_junction` relation).
    pub junction: String,
    pub lane: String,
    /// Distance along the lane.
    pub pos: f64,
}

/// Derived traffic-light to traffic-light adjacency: `to` is reachable from
/// `from` by a directed lane path whose interior contains no other traffic
/// light.
#[derive(Debug, Clone)]
pub struct Adjacency {
    pub from: String,
    pub to: String,
    /// Road `from` sends its traffic out on toward `to`.
    pub first_hop: String,
    pub num_out_edges: usize,
    pub num_in_edges: usize,
    /// Summed lane distance along the shortest path.
    pub distance: f64,
    /// Mean slope along the shortest path.
    pub slope: f64,
}
