use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use log::{debug, warn};

use crate::errors::{Result, TwinError};
use crate::global_variables::{DEFAULT_DETECTOR_FREQ, DEFAULT_DETECTOR_POS};
use crate::history::LaneSummary;
use crate::topology::adjacency;
use crate::topology::types::{Adjacency, Detector, Junction, JunctionKind, LaneRelation};
use crate::turns::Turn;

// Fallback lane speed in m/s when the edges file has no edge_speed column.
const DEFAULT_MAX_SPEED: f64 = 13.89;

/// In-memory graph of junctions, lanes and detectors, plus the derived
/// traffic-light adjacency and per-road turn targets. Serves the same
/// operation set an external graph store would.
#[derive(Debug, Clone)]
pub struct TopologyStore {
    junctions: HashMap<String, Junction>,
    junction_order: Vec<String>,
    lanes: Vec<LaneRelation>,
    lane_index: HashMap<String, usize>,
    out_lanes: HashMap<String, Vec<usize>>,
    in_lanes: HashMap<String, Vec<usize>>,
    edge_lanes: HashMap<String, Vec<usize>>,
    detectors: Vec<Detector>,
    adjacency: HashMap<String, Vec<Adjacency>>,
    /// road -> turn -> target road, classified from junction geometry.
    turn_targets: HashMap<String, HashMap<Turn, String>>,
}

struct Columns {
    indices: HashMap<String, usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let indices = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_string(), i))
            .collect();
        Columns { indices }
    }

    fn required<'r>(&self, record: &'r StringRecord, name: &str) -> Result<&'r str> {
        let idx = self
            .indices
            .get(name)
            .ok_or_else(|| TwinError::TopologyLoad(format!("missing required column '{}'", name)))?;
        record
            .get(*idx)
            .map(|v| v.trim())
            .ok_or_else(|| TwinError::TopologyLoad(format!("short row, no value for '{}'", name)))
    }

    fn optional<'r>(&self, record: &'r StringRecord, name: &str) -> Option<&'r str> {
        let idx = self.indices.get(name)?;
        record.get(*idx).map(|v| v.trim()).filter(|v| !v.is_empty())
    }
}

fn parse_f64(value: &str, column: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| TwinError::TopologyLoad(format!("bad numeric value '{}' in '{}'", value, column)))
}

impl TopologyStore {
    /// Loads the road network from semicolon-separated junction and edge
    /// files, then derives detectors, turn targets and TL adjacency.
    pub fn load_topology_files(edges: &Path, junctions: &Path) -> Result<TopologyStore> {
        let edges_file = File::open(edges)
            .map_err(|e| TwinError::TopologyLoad(format!("{}: {}", edges.display(), e)))?;
        let junctions_file = File::open(junctions)
            .map_err(|e| TwinError::TopologyLoad(format!("{}: {}", junctions.display(), e)))?;
        Self::load_topology(edges_file, junctions_file)
    }

    pub fn load_topology<E: Read, J: Read>(edges: E, junctions: J) -> Result<TopologyStore> {
        let mut store = TopologyStore {
            junctions: HashMap::new(),
            junction_order: Vec::new(),
            lanes: Vec::new(),
            lane_index: HashMap::new(),
            out_lanes: HashMap::new(),
            in_lanes: HashMap::new(),
            edge_lanes: HashMap::new(),
            detectors: Vec::new(),
            adjacency: HashMap::new(),
            turn_targets: HashMap::new(),
        };
        store.read_junctions(junctions)?;
        store.read_edges(edges)?;
        store.generate_detectors();
        store.derive_turn_targets();
        store.adjacency = adjacency::derive(&store);
        debug!(
            "topology loaded: {} junctions, {} lanes, {} detectors",
            store.junction_order.len(),
            store.lanes.len(),
            store.detectors.len()
        );
        Ok(store)
    }

    fn read_junctions<J: Read>(&mut self, reader: J) -> Result<()> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b';')
            .trim(csv::Trim::All)
            .from_reader(reader);
        let cols = Columns::from_headers(rdr.headers()?);
        for record in rdr.records() {
            let record = record?;
            let name = cols.required(&record, "node_id")?.to_string();
            let x = parse_f64(cols.required(&record, "node_x")?, "node_x")?;
            let y = parse_f64(cols.required(&record, "node_y")?, "node_y")?;
            let kind = if cols.required(&record, "node_type")?.contains("traffic_light") {
                JunctionKind::TrafficLight
            } else {
                JunctionKind::Plain
            };
            let geo = match (
                cols.optional(&record, "node_lat"),
                cols.optional(&record, "node_lon"),
            ) {
                (Some(lat), Some(lon)) => Some((
                    parse_f64(lat, "node_lat")?,
                    parse_f64(lon, "node_lon")?,
                )),
                _ => None,
            };
            if self.junctions.contains_key(&name) {
                return Err(TwinError::TopologyLoad(format!(
                    "duplicate junction '{}'",
                    name
                )));
            }
            self.junction_order.push(name.clone());
            self.junctions.insert(
                name.clone(),
                Junction {
                    name,
                    x,
                    y,
                    geo,
                    kind,
                    current_program: None,
                },
            );
        }
        Ok(())
    }

    fn read_edges<E: Read>(&mut self, reader: E) -> Result<()> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b';')
            .trim(csv::Trim::All)
            .from_reader(reader);
        let cols = Columns::from_headers(rdr.headers()?);
        for record in rdr.records() {
            let record = record?;
            let edge = cols.required(&record, "edge_id")?.to_string();
            let from = cols.required(&record, "edge_from")?.to_string();
            let to = cols.required(&record, "edge_to")?.to_string();
            let num_lanes: usize = cols
                .required(&record, "edge_numLanes")?
                .parse()
                .map_err(|_| TwinError::TopologyLoad(format!("bad edge_numLanes for '{}'", edge)))?;
            let (fx, fy) = match self.junctions.get(&from) {
                Some(j) => (j.x, j.y),
                None => {
                    return Err(TwinError::TopologyLoad(format!(
                        "edge '{}' references unknown junction '{}'",
                        edge, from
                    )))
                }
            };
            let (tx, ty) = match self.junctions.get(&to) {
                Some(j) => (j.x, j.y),
                None => {
                    return Err(TwinError::TopologyLoad(format!(
                        "edge '{}' references unknown junction '{}'",
                        edge, to
                    )))
                }
            };
            let distance = match cols.optional(&record, "edge_length") {
                Some(v) => parse_f64(v, "edge_length")?,
                None => ((tx - fx).powi(2) + (ty - fy).powi(2)).sqrt(),
            };
            let max_speed = match cols.optional(&record, "edge_speed") {
                Some(v) => parse_f64(v, "edge_speed")?,
                None => DEFAULT_MAX_SPEED,
            };
            let slope = match cols.optional(&record, "edge_slope") {
                Some(v) => parse_f64(v, "edge_slope")?,
                None => 0.0,
            };
            for i in 0..num_lanes {
                let lane_name = format!("{}_{}", edge, i);
                let idx = self.lanes.len();
                self.lanes.push(LaneRelation {
                    lane_name: lane_name.clone(),
                    edge: edge.clone(),
                    from: from.clone(),
                    to: to.clone(),
                    distance,
                    slope,
                    max_speed,
                    averages: Default::default(),
                });
                self.lane_index.insert(lane_name, idx);
                self.out_lanes.entry(from.clone()).or_default().push(idx);
                self.in_lanes.entry(to.clone()).or_default().push(idx);
                self.edge_lanes.entry(edge.clone()).or_default().push(idx);
            }
        }
        Ok(())
    }

    /// One E1 detector per inbound lane of every traffic light, placed near
    /// the downstream end of short lanes.
    fn generate_detectors(&mut self) {
        for name in &self.junction_order {
            if !self.junctions[name].is_traffic_light() {
                continue;
            }
            for &idx in self.in_lanes.get(name).map(|v| v.as_slice()).unwrap_or(&[]) {
                let lane = &self.lanes[idx];
                self.detectors.push(Detector {
                    name: format!("e1_{}", lane.lane_name),
                    freq: DEFAULT_DETECTOR_FREQ,
                    file: None,
                    junction: name.clone(),
                    lane: lane.lane_name.clone(),
                    pos: DEFAULT_DETECTOR_POS.min(lane.distance - 0.01),
                });
            }
        }
    }

    /// Classifies, per approach road ending at a traffic light, each
    /// outgoing road into right / left / forward by heading difference.
    /// Ties go to the candidate closest to the band centre.
    fn derive_turn_targets(&mut self) {
        let mut targets: HashMap<String, HashMap<Turn, (String, f64)>> = HashMap::new();
        for lane in &self.lanes {
            let downstream = &self.junctions[&lane.to];
            if !downstream.is_traffic_light() {
                continue;
            }
            let origin = &self.junctions[&lane.from];
            let heading_in = (downstream.y - origin.y).atan2(downstream.x - origin.x);
            let out_idxs = self
                .out_lanes
                .get(&lane.to)
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            for &oi in out_idxs {
                let out = &self.lanes[oi];
                if out.to == lane.from {
                    // u-turn back onto the approach road
                    continue;
                }
                let dest = &self.junctions[&out.to];
                let heading_out = (dest.y - downstream.y).atan2(dest.x - downstream.x);
                let mut diff = (heading_out - heading_in).to_degrees();
                while diff > 180.0 {
                    diff -= 360.0;
                }
                while diff <= -180.0 {
                    diff += 360.0;
                }
                let turn = if diff.abs() <= 45.0 {
                    Turn::Forward
                } else if diff > 45.0 && diff <= 135.0 {
                    Turn::Left
                } else if diff < -45.0 && diff >= -135.0 {
                    Turn::Right
                } else {
                    continue;
                };
                let centre = match turn {
                    Turn::Forward => 0.0,
                    Turn::Left => 90.0,
                    Turn::Right => -90.0,
                };
                let score = (diff - centre).abs();
                let entry = targets.entry(lane.edge.clone()).or_default();
                match entry.get(&turn) {
                    Some((_, best)) if *best <= score => {}
                    _ => {
                        entry.insert(turn, (out.edge.clone(), score));
                    }
                }
            }
        }
        self.turn_targets = targets
            .into_iter()
            .map(|(road, by_turn)| {
                (
                    road,
                    by_turn.into_iter().map(|(t, (e, _))| (t, e)).collect(),
                )
            })
            .collect();
    }

    pub fn junction(&self, name: &str) -> Option<&Junction> {
        self.junctions.get(name)
    }

    /// Traffic-light junctions in file order.
    pub fn traffic_lights(&self) -> Vec<&Junction> {
        self.junction_order
            .iter()
            .map(|n| &self.junctions[n])
            .filter(|j| j.is_traffic_light())
            .collect()
    }

    pub fn lane(&self, lane_name: &str) -> Option<&LaneRelation> {
        self.lane_index.get(lane_name).map(|&i| &self.lanes[i])
    }

    /// The downstream junction of a road, if the road is known.
    pub fn road_to_junction(&self, road: &str) -> Option<&Junction> {
        let idx = *self.edge_lanes.get(road)?.first()?;
        self.junctions.get(&self.lanes[idx].to)
    }

    pub fn inbound_lanes(&self, junction: &str) -> Vec<&LaneRelation> {
        self.in_lanes
            .get(junction)
            .map(|v| v.iter().map(|&i| &self.lanes[i]).collect())
            .unwrap_or_default()
    }

    pub fn outbound_lanes(&self, junction: &str) -> Vec<&LaneRelation> {
        self.out_lanes
            .get(junction)
            .map(|v| v.iter().map(|&i| &self.lanes[i]).collect())
            .unwrap_or_default()
    }

    pub fn detectors_of(&self, junction: &str) -> Vec<&Detector> {
        self.detectors
            .iter()
            .filter(|d| d.junction == junction)
            .collect()
    }

    /// Traffic lights reachable from `tl` through a lane path free of other
    /// traffic lights, in derivation order.
    pub fn adjacent_traffic_lights(&self, tl: &str) -> Vec<&Junction> {
        self.adjacency
            .get(tl)
            .map(|rows| rows.iter().map(|a| &self.junctions[&a.to]).collect())
            .unwrap_or_default()
    }

    pub fn adjacency_rows(&self, tl: &str) -> &[Adjacency] {
        self.adjacency.get(tl).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Target road for taking `turn` off `road`, when the junction geometry
    /// offers one.
    pub fn turn_target(&self, road: &str, turn: Turn) -> Option<&str> {
        self.turn_targets
            .get(road)
            .and_then(|m| m.get(&turn))
            .map(|s| s.as_str())
    }

    /// Legal (turn, target road) pairs off `road`.
    pub fn turns_from(&self, road: &str) -> Vec<(Turn, &str)> {
        self.turn_targets
            .get(road)
            .map(|m| m.iter().map(|(t, e)| (*t, e.as_str())).collect())
            .unwrap_or_default()
    }

    /// Overwrites the rolling averages of each lane named in `records`.
    /// Repeating the same window is a no-op; a different writer for the same
    /// lane and window wins with a warning.
    pub fn update_lane_metrics(
        &mut self,
        tl: &str,
        window: u64,
        records: &[LaneSummary],
    ) -> Result<()> {
        if !self.junctions.contains_key(tl) {
            return Err(TwinError::TopologyUnavailable(format!(
                "unknown junction '{}'",
                tl
            )));
        }
        for record in records {
            let idx = match self.lane_index.get(&record.lane) {
                Some(&i) => i,
                None => {
                    warn!("{}: dropping metrics for unknown lane {}", tl, record.lane);
                    continue;
                }
            };
            let lane = &mut self.lanes[idx];
            if lane.averages.window == Some(window)
                && lane.averages.num_passing_veh != record.num_passing_veh
            {
                warn!(
                    "lane {} rewritten for window {} (last writer wins)",
                    record.lane, window
                );
            }
            lane.averages.num_passing_veh = record.num_passing_veh;
            lane.averages.waiting_time_veh = record.waiting_time_veh;
            lane.averages.occupancy = record.avg_occupancy;
            lane.averages.co2 = record.avg_co2;
            lane.averages.co = record.avg_co;
            lane.averages.hc = record.avg_hc;
            lane.averages.pmx = record.avg_pmx;
            lane.averages.nox = record.avg_nox;
            lane.averages.noise = record.avg_noise;
            lane.averages.window = Some(window);
        }
        Ok(())
    }

    /// Stores the active signal program on the traffic-light node.
    pub fn update_tl_program(&mut self, tl: &str, program: &str) -> Result<()> {
        match self.junctions.get_mut(tl) {
            Some(j) if j.is_traffic_light() => {
                j.current_program = Some(program.to_string());
                Ok(())
            }
            Some(_) => Err(TwinError::TopologyUnavailable(format!(
                "junction '{}' has no traffic light",
                tl
            ))),
            None => Err(TwinError::TopologyUnavailable(format!(
                "unknown junction '{}'",
                tl
            ))),
        }
    }

    // Internals shared with the adjacency derivation.
    pub(crate) fn junction_order(&self) -> &[String] {
        &self.junction_order
    }

    pub(crate) fn junction_map(&self) -> &HashMap<String, Junction> {
        &self.junctions
    }

    pub(crate) fn out_lane_indices(&self, junction: &str) -> &[usize] {
        self.out_lanes
            .get(junction)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn in_lane_indices(&self, junction: &str) -> &[usize] {
        self.in_lanes
            .get(junction)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn lane_at(&self, idx: usize) -> &LaneRelation {
        &self.lanes[idx]
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    // 3x1 corridor with traffic lights at both ends plus a plain junction in
    // the middle, and a northern spur for turn classification:
    //
    //            n_top
    //              |
    //   tl_a -- mid -- tl_b
    pub const JUNCTIONS_CSV: &str = "\
node_id;node_x;node_y;node_type
tl_a;0;0;traffic_light
mid;100;0;priority
tl_b;200;0;traffic_light
n_top;100;100;priority
";

    pub const EDGES_CSV: &str = "\
edge_id;edge_from;edge_to;edge_numLanes;edge_speed
a_mid;tl_a;mid;2;13.89
mid_b;mid;tl_b;2;13.89
b_mid;tl_b;mid;1;13.89
mid_a;mid;tl_a;1;13.89
mid_top;mid;n_top;1;13.89
top_mid;n_top;mid;1;13.89
";

    pub fn corridor() -> TopologyStore {
        TopologyStore::load_topology(EDGES_CSV.as_bytes(), JUNCTIONS_CSV.as_bytes()).unwrap()
    }
}
