use std::collections::{HashMap, VecDeque};

use crate::global_variables::MAX_ADJACENCY_PATH_LEN;
use crate::topology::store::TopologyStore;
use crate::topology::types::Adjacency;

/// Derives the traffic-light adjacency map once after load: `b` is adjacent
/// to `a` iff the shortest directed lane path from `a` to `b` (bounded at
/// MAX_ADJACENCY_PATH_LEN hops) contains no other traffic light in its
/// interior. Junction file order breaks ties and orders the result.
pub(crate) fn derive(store: &TopologyStore) -> HashMap<String, Vec<Adjacency>> {
    let mut result: HashMap<String, Vec<Adjacency>> = HashMap::new();
    let tls: Vec<&str> = store
        .junction_order()
        .iter()
        .filter(|n| store.junction_map()[*n].is_traffic_light())
        .map(|n| n.as_str())
        .collect();

    for &source in &tls {
        let paths = bounded_shortest_paths(store, source);
        let mut rows = Vec::new();
        for &target in &tls {
            if target == source {
                continue;
            }
            let path = match reconstruct(&paths, source, target) {
                Some(p) => p,
                None => continue,
            };
            // The first traffic light after the source must be the target
            // itself; anything earlier makes the pair non-adjacent.
            let first_tl = path[1..]
                .iter()
                .find(|n| store.junction_map()[*n].is_traffic_light());
            if first_tl.map(|n| n.as_str()) != Some(target) {
                continue;
            }
            rows.push(build_row(store, &path));
        }
        result.insert(source.to_string(), rows);
    }
    result
}

/// BFS over the junction graph, following lanes in file order so that the
/// first shortest path found is the insertion-order tie-break winner.
fn bounded_shortest_paths(store: &TopologyStore, source: &str) -> HashMap<String, String> {
    let mut prev: HashMap<String, String> = HashMap::new();
    let mut depth: HashMap<&str, usize> = HashMap::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    depth.insert(source, 0);
    queue.push_back(source);
    while let Some(node) = queue.pop_front() {
        let d = depth[node];
        if d >= MAX_ADJACENCY_PATH_LEN {
            continue;
        }
        for &idx in store.out_lane_indices(node) {
            let next = store.lane_at(idx).to.as_str();
            if next == source || depth.contains_key(next) {
                continue;
            }
            depth.insert(next, d + 1);
            prev.insert(next.to_string(), node.to_string());
            queue.push_back(next);
        }
    }
    prev
}

fn reconstruct(prev: &HashMap<String, String>, source: &str, target: &str) -> Option<Vec<String>> {
    let mut path = vec![target.to_string()];
    let mut cursor = target;
    while cursor != source {
        cursor = prev.get(cursor)?;
        path.push(cursor.to_string());
    }
    path.reverse();
    Some(path)
}

fn build_row(store: &TopologyStore, path: &[String]) -> Adjacency {
    let source = &path[0];
    let target = &path[path.len() - 1];
    let mut distance = 0.0;
    let mut slope = 0.0;
    let mut hops = 0usize;
    for pair in path.windows(2) {
        if let Some(lane) = store
            .out_lane_indices(&pair[0])
            .iter()
            .map(|&i| store.lane_at(i))
            .find(|l| l.to == pair[1])
        {
            distance += lane.distance;
            slope += lane.slope;
            hops += 1;
        }
    }
    let first_hop = store
        .out_lane_indices(source)
        .iter()
        .map(|&i| store.lane_at(i))
        .find(|l| l.to == path[1])
        .map(|l| l.edge.clone())
        .unwrap_or_default();
    let num_out_edges = store
        .out_lane_indices(source)
        .iter()
        .filter(|&&i| store.lane_at(i).to == path[1])
        .count();
    let num_in_edges = store
        .in_lane_indices(target)
        .iter()
        .filter(|&&i| store.lane_at(i).from == path[path.len() - 2])
        .count();
    Adjacency {
        from: source.clone(),
        to: target.clone(),
        first_hop,
        num_out_edges,
        num_in_edges,
        distance,
        slope: if hops > 0 { slope / hops as f64 } else { 0.0 },
    }
}

#[cfg(test)]
mod tests {
    use crate::topology::store::test_fixtures::corridor;
    use crate::topology::TopologyStore;

    #[test]
    fn corridor_lights_are_mutually_adjacent() {
        let store = corridor();
        let from_a: Vec<_> = store
            .adjacent_traffic_lights("tl_a")
            .iter()
            .map(|j| j.name.clone())
            .collect();
        assert_eq!(from_a, vec!["tl_b"]);
        let rows = store.adjacency_rows("tl_a");
        assert_eq!(rows[0].first_hop, "a_mid");
        assert_eq!(rows[0].num_out_edges, 2); // a_mid has two lanes
        assert_eq!(rows[0].num_in_edges, 2); // mid_b has two lanes
        assert!((rows[0].distance - 200.0).abs() < 1e-9);
    }

    #[test]
    fn interposed_traffic_light_blocks_adjacency() {
        let junctions = "node_id;node_x;node_y;node_type
a;0;0;traffic_light
b;100;0;traffic_light
c;200;0;traffic_light
";
        let edges = "edge_id;edge_from;edge_to;edge_numLanes
ab;a;b;1
bc;b;c;1
";
        let store = TopologyStore::load_topology(edges.as_bytes(), junctions.as_bytes()).unwrap();
        let from_a: Vec<_> = store
            .adjacent_traffic_lights("a")
            .iter()
            .map(|j| j.name.clone())
            .collect();
        assert_eq!(from_a, vec!["b"]);
        // c is only reachable through b, so it is not adjacent to a.
        assert!(!from_a.contains(&"c".to_string()));
        // One-way corridor: nothing is reachable from c.
        assert!(store.adjacent_traffic_lights("c").is_empty());
    }

    #[test]
    fn reload_produces_identical_adjacency() {
        let first = corridor();
        let second = corridor();
        for tl in ["tl_a", "tl_b"] {
            let a: Vec<_> = first
                .adjacent_traffic_lights(tl)
                .iter()
                .map(|j| j.name.clone())
                .collect();
            let b: Vec<_> = second
                .adjacent_traffic_lights(tl)
                .iter()
                .map(|j| j.name.clone())
                .collect();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn self_adjacency_is_forbidden() {
        let store = corridor();
        assert!(store
            .adjacent_traffic_lights("tl_a")
            .iter()
            .all(|j| j.name != "tl_a"));
    }
}
