//! The static track graph (§3 Data Model, "Track graph").
//!
//! Every node carries exactly two edge slots; non-`Branch` nodes only ever
//! populate slot 0. Every edge `u -> v` has a mirror edge `v.reverse ->
//! u.reverse` of the same distance, enforced by [`TrackGraph::validate`].

use heapless::String as HString;
use heapless::Vec as HVec;

use marklin_common::consts::TRACK_MAX;
use marklin_common::error::{MarklinError, MarklinResult};
use marklin_common::ids::NodeIndex;

/// Maximum length of a track node's printable name.
pub const NODE_NAME_MAX: usize = 16;

/// Node role, per the physical track topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// A plain sensor (occupancy detector), single through-track.
    Sensor,
    /// A facing switch: two outgoing edges, `Straight` (slot 0) and `Curved` (slot 1).
    Branch,
    /// The trailing side of a switch: single outgoing edge, two physical
    /// predecessors (its own reverse is the [`NodeType::Branch`] view).
    Merge,
    /// A track end where a train may be placed.
    Enter,
    /// A track end where a train leaves the modeled layout.
    Exit,
}

/// Which edge slot a branch direction corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Straight = 0,
    Curved = 1,
}

/// One directed edge between two track nodes.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub dest: NodeIndex,
    /// Physical distance, in millimetres.
    pub dist_mm: u32,
    /// Fixed-point resistance coefficient, scale 1000 (1000 = 1.0).
    pub resistance: u32,
}

/// One node in the static track graph.
#[derive(Debug, Clone)]
pub struct TrackNode {
    pub name: HString<NODE_NAME_MAX>,
    pub node_type: NodeType,
    pub num: i32,
    /// The same physical location, facing the opposite direction.
    pub reverse: NodeIndex,
    pub edge: [Option<Edge>; 2],
}

impl TrackNode {
    /// Edge in the given direction, if the node has one.
    pub fn edge(&self, dir: EdgeDirection) -> Option<&Edge> {
        self.edge[dir as usize].as_ref()
    }
}

/// The complete, immutable-after-construction track graph for one layout.
pub struct TrackGraph {
    nodes: HVec<TrackNode, TRACK_MAX>,
}

impl TrackGraph {
    pub(crate) fn from_nodes(nodes: HVec<TrackNode, TRACK_MAX>) -> Self {
        Self { nodes }
    }

    /// Number of nodes (forward and reverse) in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: NodeIndex) -> &TrackNode {
        &self.nodes[idx.0 as usize]
    }

    /// Look up a node by its printable name.
    pub fn find_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.nodes
            .iter()
            .position(|n| n.name.as_str() == name)
            .map(|i| NodeIndex(i as u16))
    }

    /// Iterate all nodes with their index.
    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &TrackNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeIndex(i as u16), n))
    }

    /// Structural sanity check: every Branch has both slots (or zero, for an
    /// unconnected stub), every non-Branch has at most slot 0, and every
    /// edge has a same-distance mirror rooted at the destination's reverse.
    pub fn validate(&self) -> MarklinResult<()> {
        for (idx, node) in self.iter() {
            if node.node_type != NodeType::Branch && node.edge[1].is_some() {
                return Err(MarklinError::InvalidArgument);
            }
            for slot in node.edge.iter().flatten() {
                let dest = self.node(slot.dest);
                let dest_rev = self.node(dest.reverse);
                let my_rev = node.reverse;
                let has_mirror = dest_rev
                    .edge
                    .iter()
                    .flatten()
                    .any(|m| m.dest == my_rev && m.dist_mm == slot.dist_mm);
                if !has_mirror {
                    return Err(MarklinError::InvalidArgument);
                }
            }
            let _ = idx;
        }
        Ok(())
    }
}

pub(crate) fn name(s: &str) -> HString<NODE_NAME_MAX> {
    let mut out = HString::new();
    out.push_str(s).expect("track node name exceeds NODE_NAME_MAX");
    out
}
