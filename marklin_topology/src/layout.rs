//! Hardcoded per-layout track tables (§4.6 "built once from a hardcoded
//! layout-specific table").
//!
//! Grounded on `conductor_init_hardcoded_blocks`/`block_definitions.c`'s
//! build-once-at-startup shape; the original's literal per-node C tables
//! were not present in the retrieval pack, so the two layouts here are
//! generated by a small reverse-consistent graph builder instead of
//! transcribed verbatim (see `DESIGN.md`).

pub use marklin_common::config::TrackLayout;
use marklin_common::ids::NodeIndex;

use crate::graph::{name, Edge, NodeType, TrackGraph, TrackNode};

struct Builder {
    nodes: Vec<TrackNode>,
}

impl Builder {
    fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    fn pair(
        &mut self,
        fwd_name: &str,
        fwd_type: NodeType,
        rev_name: &str,
        rev_type: NodeType,
    ) -> (NodeIndex, NodeIndex) {
        let fwd_idx = NodeIndex(self.nodes.len() as u16);
        let rev_idx = NodeIndex(self.nodes.len() as u16 + 1);
        self.nodes.push(TrackNode {
            name: name(fwd_name),
            node_type: fwd_type,
            num: fwd_idx.0 as i32,
            reverse: rev_idx,
            edge: [None, None],
        });
        self.nodes.push(TrackNode {
            name: name(rev_name),
            node_type: rev_type,
            num: rev_idx.0 as i32,
            reverse: fwd_idx,
            edge: [None, None],
        });
        (fwd_idx, rev_idx)
    }

    /// Link `from --slot--> to` (distance `dist_mm`) and install the mirror
    /// edge `to.reverse --mirror_slot--> from.reverse` automatically.
    fn link(&mut self, from: NodeIndex, slot: usize, to: NodeIndex, dist_mm: u32, mirror_slot: usize) {
        let resistance = 1000;
        self.nodes[from.0 as usize].edge[slot] = Some(Edge { dest: to, dist_mm, resistance });
        let to_rev = self.nodes[to.0 as usize].reverse;
        let from_rev = self.nodes[from.0 as usize].reverse;
        self.nodes[to_rev.0 as usize].edge[mirror_slot] =
            Some(Edge { dest: from_rev, dist_mm, resistance });
    }

    fn finish(self) -> TrackGraph {
        let mut v = heapless::Vec::new();
        for n in self.nodes {
            v.push(n).expect("layout exceeds TRACK_MAX nodes");
        }
        TrackGraph::from_nodes(v)
    }
}

/// Build a ring layout with one siding (a `Branch`/`Merge` pair bypassing
/// one ring hop) and one dead-end spur (a `Branch` leading to an `Exit`).
fn build_ring(
    ring_len: usize,
    siding_pos: usize,
    exit_pos: usize,
    ring_dist: u32,
    siding_leg_dist: u32,
    exit_dist: u32,
) -> TrackGraph {
    assert!(siding_pos != exit_pos && ring_len >= 6);
    let merge_pos = (siding_pos + 2) % ring_len;
    let mut b = Builder::new();

    let mut ring = Vec::with_capacity(ring_len);
    for i in 0..ring_len {
        let (fwd_name, fwd_ty, rev_name, rev_ty) = if i == siding_pos {
            ("BR1".to_string(), NodeType::Branch, "BR1r".to_string(), NodeType::Merge)
        } else if i == exit_pos {
            (format!("S{i}"), NodeType::Branch, format!("S{i}r"), NodeType::Merge)
        } else if i == merge_pos {
            ("MG1".to_string(), NodeType::Merge, "MG1r".to_string(), NodeType::Branch)
        } else {
            (format!("S{i}"), NodeType::Sensor, format!("S{i}r"), NodeType::Sensor)
        };
        let pair = b.pair(&fwd_name, fwd_ty, &rev_name, rev_ty);
        ring.push(pair);
    }

    let (sd1, sd1r) = b.pair("SD1", NodeType::Sensor, "SD1r", NodeType::Sensor);
    let (sd2, sd2r) = b.pair("SD2", NodeType::Sensor, "SD2r", NodeType::Sensor);
    let (ex, ent) = b.pair("EX1", NodeType::Exit, "ENT1", NodeType::Enter);
    let _ = (sd1r, sd2r);

    for i in 0..ring_len {
        let next = (i + 1) % ring_len;
        b.link(ring[i].0, 0, ring[next].0, ring_dist, 0);
    }
    b.link(ring[siding_pos].0, 1, sd1, siding_leg_dist, 0);
    b.link(sd1, 0, sd2, siding_leg_dist, 0);
    b.link(sd2, 0, ring[merge_pos].0, siding_leg_dist, 1);
    b.link(ring[exit_pos].0, 1, ex, exit_dist, 0);
    let _ = ent;

    b.finish()
}

/// Build layout A's track graph.
pub fn layout_a() -> TrackGraph {
    build_ring(10, 3, 8, 300, 220, 180)
}

/// Build layout B's track graph.
pub fn layout_b() -> TrackGraph {
    build_ring(12, 2, 7, 280, 240, 200)
}

/// Build the track graph for the given layout.
pub fn load(layout: TrackLayout) -> TrackGraph {
    match layout {
        TrackLayout::A => layout_a(),
        TrackLayout::B => layout_b(),
    }
}

/// Locations excluded from path-finding reversal at the path's start
/// (§4.6 "hardcoded per-layout list of unsafe locations"). Named by the
/// node's `name` field.
pub fn reversal_blacklist(layout: TrackLayout) -> &'static [&'static str] {
    match layout {
        TrackLayout::A => &["BR1", "S8"],
        TrackLayout::B => &["BR1", "S7"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_a_has_the_expected_node_count() {
        // 10 ring + 2 siding + 1 exit/enter pair = 13 forward + 13 reverse.
        let graph = layout_a();
        assert_eq!(graph.len(), 26);
    }

    #[test]
    fn layout_b_has_the_expected_node_count() {
        let graph = layout_b();
        assert_eq!(graph.len(), 30);
    }

    #[test]
    fn exit_node_has_no_outgoing_edge() {
        let graph = layout_a();
        let ex = graph.node(graph.find_by_name("EX1").unwrap());
        assert!(ex.edge(crate::graph::EdgeDirection::Straight).is_none());
        assert!(ex.edge(crate::graph::EdgeDirection::Curved).is_none());
    }

    #[test]
    fn reversal_blacklist_names_resolve_to_real_nodes() {
        for layout in [TrackLayout::A, TrackLayout::B] {
            let graph = load(layout);
            for n in reversal_blacklist(layout) {
                assert!(graph.find_by_name(n).is_some(), "{n} missing from {layout}");
            }
        }
    }
}
