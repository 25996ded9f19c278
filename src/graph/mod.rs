//! The variation-graph data model.
//!
//! A graph is a DAG whose nodes carry nucleotide sequence spans of the
//! reference, augmented with variant alternatives. Nodes live in an arena
//! shared between a base graph and all subgraphs derived from it; each
//! graph stores only its own insertion order and adjacency. Insertion
//! order doubles as the topological order used during traversal.

pub mod builder;
pub mod manager;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::utils::{num_to_seq, Base};

/// Node identifier, unique within one arena.
pub type NodeId = u32;

/// Arena mapping node ids to immutable nodes.
pub type NodeMap = HashMap<NodeId, Node>;

// ============================================================================
// Population bitset
// ============================================================================

/// Bitset over the haplotypes of the source variant catalog. Bit `i` is set
/// iff haplotype `i` carries the node's allele.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Population {
    len: usize,
    bits: Vec<u64>,
}

impl Population {
    pub fn new(len: usize, fill: bool) -> Population {
        let words = len.div_ceil(64);
        let mut bits = vec![if fill { u64::MAX } else { 0 }; words];
        if fill && len % 64 != 0 {
            if let Some(last) = bits.last_mut() {
                *last = (1u64 << (len % 64)) - 1;
            }
        }
        Population { len, bits }
    }

    pub fn with_indices(len: usize, indices: &[usize]) -> Population {
        let mut pop = Population::new(len, false);
        for &i in indices {
            pop.set(i, true);
        }
        pop
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&mut self, i: usize, value: bool) {
        assert!(i < self.len);
        if value {
            self.bits[i / 64] |= 1u64 << (i % 64);
        } else {
            self.bits[i / 64] &= !(1u64 << (i % 64));
        }
    }

    pub fn get(&self, i: usize) -> bool {
        assert!(i < self.len);
        self.bits[i / 64] & (1u64 << (i % 64)) != 0
    }

    pub fn count_ones(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True if any haplotype is in both sets.
    pub fn intersects(&self, other: &Population) -> bool {
        self.bits
            .iter()
            .zip(&other.bits)
            .any(|(a, b)| a & b != 0)
    }

    pub fn indices(&self) -> Vec<usize> {
        (0..self.len).filter(|&i| self.get(i)).collect()
    }
}

// ============================================================================
// Node
// ============================================================================

/// One sequence span. An empty sequence represents a pure deletion edge;
/// its `end_pos` inherits the predecessor's end.
#[derive(Clone, Debug)]
pub struct Node {
    id: NodeId,
    seq: Vec<Base>,
    end_pos: u32,
    is_ref: bool,
    af: f32,
    population: Population,
    pinched: bool,
}

impl Node {
    pub fn new(id: NodeId) -> Node {
        Node {
            id,
            seq: Vec::new(),
            end_pos: 0,
            is_ref: true,
            af: 1.0,
            population: Population::default(),
            pinched: false,
        }
    }

    /// Convenience constructor used by tests and the simulator.
    pub fn with_seq(seq: &str, end_pos: u32) -> Node {
        let mut n = Node::new(0);
        n.set_seq_str(seq);
        n.set_end_pos(end_pos);
        n
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: NodeId) {
        self.id = id;
    }

    pub fn seq(&self) -> &[Base] {
        &self.seq
    }

    pub fn seq_str(&self) -> String {
        num_to_seq(&self.seq)
    }

    pub fn set_seq(&mut self, seq: Vec<Base>) {
        self.seq = seq;
    }

    pub fn set_seq_str(&mut self, seq: &str) {
        self.seq = crate::utils::seq_to_num(seq);
    }

    /// 0-indexed genomic coordinate of the last base.
    pub fn end_pos(&self) -> u32 {
        self.end_pos
    }

    pub fn set_end_pos(&mut self, pos: u32) {
        self.end_pos = pos;
    }

    /// 0-indexed genomic coordinate of the first base. For an empty node
    /// this is one past `end_pos`, matching an insertion-point coordinate.
    pub fn begin_pos(&self) -> u32 {
        self.end_pos + 1 - self.seq.len() as u32
    }

    pub fn is_ref(&self) -> bool {
        self.is_ref
    }

    pub fn set_as_ref(&mut self) {
        self.is_ref = true;
    }

    pub fn set_not_ref(&mut self) {
        self.is_ref = false;
    }

    pub fn af(&self) -> f32 {
        self.af
    }

    pub fn set_af(&mut self, af: f32) {
        self.af = af;
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn set_population(&mut self, pop: Population) {
        self.population = pop;
    }

    /// True iff the node closes a frontier: a backbone chunk, or the last
    /// allele feeding an adjacent variant site. Pinch points are the only
    /// places the engine compacts its seed table.
    pub fn is_pinched(&self) -> bool {
        self.pinched
    }

    pub fn pinch(&mut self) {
        self.pinched = true;
    }

    pub fn set_pinched(&mut self, pinched: bool) {
        self.pinched = pinched;
    }
}

// ============================================================================
// Graph
// ============================================================================

/// A graph view over a shared node arena: an insertion order (which is also
/// a valid topological order) plus forward and reverse adjacency.
#[derive(Clone, Debug)]
pub struct Graph {
    nodes: Arc<NodeMap>,
    order: Vec<NodeId>,
    next: HashMap<NodeId, Vec<NodeId>>,
    prev: HashMap<NodeId, Vec<NodeId>>,
    pop_size: usize,
}

impl Graph {
    /// Build a graph from a shared arena, an insertion order, and forward
    /// adjacency. The reverse adjacency is derived.
    pub fn from_parts(
        nodes: Arc<NodeMap>,
        order: Vec<NodeId>,
        next: HashMap<NodeId, Vec<NodeId>>,
        pop_size: usize,
    ) -> Graph {
        let mut prev: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (&from, tos) in &next {
            for &to in tos {
                prev.entry(to).or_default().push(from);
            }
        }
        for v in prev.values_mut() {
            v.sort_unstable();
        }
        Graph {
            nodes,
            order,
            next,
            prev,
            pop_size,
        }
    }

    /// Assemble a standalone graph from nodes and edges. Nodes are assigned
    /// ids by their position in `nodes`; edges refer to those positions.
    pub fn assemble(mut nodes: Vec<Node>, edges: &[(NodeId, NodeId)]) -> Graph {
        let mut arena = NodeMap::new();
        let mut order = Vec::with_capacity(nodes.len());
        for (i, node) in nodes.iter_mut().enumerate() {
            node.set_id(i as NodeId);
            order.push(i as NodeId);
        }
        let pop_size = nodes.iter().map(|n| n.population().len()).max().unwrap_or(0);
        for node in nodes {
            arena.insert(node.id(), node);
        }
        let mut next: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for &(from, to) in edges {
            next.entry(from).or_default().push(to);
        }
        Graph::from_parts(Arc::new(arena), order, next, pop_size)
    }

    pub fn arena(&self) -> &Arc<NodeMap> {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[&id]
    }

    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// First inserted node.
    pub fn root(&self) -> Option<NodeId> {
        self.order.first().copied()
    }

    pub fn num_nodes(&self) -> usize {
        self.order.len()
    }

    pub fn num_edges(&self) -> usize {
        self.next.values().map(Vec::len).sum()
    }

    pub fn pop_size(&self) -> usize {
        self.pop_size
    }

    /// Nodes in insertion (topological) order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().map(move |id| &self.nodes[id])
    }

    pub fn incoming(&self, id: NodeId) -> &[NodeId] {
        self.prev.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn outgoing(&self, id: NodeId) -> &[NodeId] {
        self.next.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn next_map(&self) -> &HashMap<NodeId, Vec<NodeId>> {
        &self.next
    }

    /// True if no node branches; sub-optimal score tracking is only
    /// meaningful on linear graphs.
    pub fn is_linear(&self) -> bool {
        self.next.values().all(|v| v.len() <= 1)
    }

    /// Longest node sequence, bounding per-node work in the engine.
    pub fn max_node_len(&self) -> usize {
        self.iter().map(|n| n.seq().len()).max().unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Derivation
    // ------------------------------------------------------------------

    /// Retain only reference-backbone nodes.
    pub fn derive_ref(&self) -> Result<Graph> {
        self.derive_where(|n| n.is_ref())
    }

    /// Follow the highest-allele-frequency outgoing edge from the root,
    /// producing a linear path.
    pub fn derive_maxaf(&self) -> Result<Graph> {
        let mut retained: Vec<NodeId> = Vec::new();
        let mut curr = self
            .root()
            .ok_or_else(|| Error::InvalidInput("cannot derive from an empty graph".to_string()))?;
        loop {
            retained.push(curr);
            let succ = self.outgoing(curr);
            if succ.is_empty() {
                break;
            }
            let mut best = succ[0];
            for &cand in &succ[1..] {
                if self.nodes[&cand].af() > self.nodes[&best].af() {
                    best = cand;
                }
            }
            curr = best;
        }
        let set: std::collections::HashSet<NodeId> = retained.iter().copied().collect();
        self.derive_where(|n| set.contains(&n.id()))
    }

    /// Retain nodes whose population intersects `filter`.
    pub fn derive_filter(&self, filter: &Population) -> Result<Graph> {
        self.derive_where(|n| n.population().intersects(filter))
    }

    fn derive_where<F: Fn(&Node) -> bool>(&self, keep: F) -> Result<Graph> {
        let order: Vec<NodeId> = self
            .order
            .iter()
            .copied()
            .filter(|id| keep(&self.nodes[id]))
            .collect();
        match (self.root(), order.first()) {
            (Some(root), Some(&first)) if root == first => {}
            (Some(_), _) => {
                return Err(Error::InvalidInput(
                    "derivation does not retain the root node".to_string(),
                ))
            }
            (None, _) => {
                return Err(Error::InvalidInput(
                    "cannot derive from an empty graph".to_string(),
                ))
            }
        }
        let set: std::collections::HashSet<NodeId> = order.iter().copied().collect();
        let mut next: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for &from in &order {
            if let Some(tos) = self.next.get(&from) {
                let kept: Vec<NodeId> = tos.iter().copied().filter(|t| set.contains(t)).collect();
                if !kept.is_empty() {
                    next.insert(from, kept);
                }
            }
        }
        Ok(Graph::from_parts(
            Arc::clone(&self.nodes),
            order,
            next,
            self.pop_size,
        ))
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    pub fn statistics(&self) -> Statistics {
        let mut stat = Statistics {
            num_nodes: self.num_nodes(),
            num_edges: self.num_edges(),
            ..Statistics::default()
        };
        for node in self.iter() {
            stat.total_length += node.seq().len();
            if !node.is_ref() {
                match node.seq().len() {
                    0 => stat.num_dels += 1,
                    1 => stat.num_snps += 1,
                    _ => stat.num_other += 1,
                }
            }
        }
        stat
    }

    /// Render the graph in DOT format.
    pub fn to_dot(&self, label: &str) -> String {
        let mut out = String::new();
        out.push_str(&format!("digraph \"{}\" {{\n", label));
        out.push_str("  rankdir=LR;\n  node [shape=box];\n");
        for node in self.iter() {
            let mut seq = node.seq_str();
            if seq.len() > 12 {
                seq.truncate(12);
                seq.push_str("...");
            }
            if seq.is_empty() {
                seq.push('-');
            }
            out.push_str(&format!(
                "  n{} [label=\"{}\\n{} {:.2}\"];\n",
                node.id(),
                seq,
                node.end_pos(),
                node.af()
            ));
        }
        for &from in &self.order {
            for &to in self.outgoing(from) {
                out.push_str(&format!("  n{} -> n{};\n", from, to));
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Summary counts for one graph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    pub num_nodes: usize,
    pub num_edges: usize,
    pub total_length: usize,
    pub num_snps: usize,
    pub num_dels: usize,
    pub num_other: usize,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} edges, {} bp, {} SNPs, {} deletions, {} other alts",
            self.num_nodes,
            self.num_edges,
            self.total_length,
            self.num_snps,
            self.num_dels,
            self.num_other
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bubble_graph() -> Graph {
        //      GGG
        //     /   \
        //  AAA     TTTA
        //     \   /
        //      CCC(ref)
        let mut n0 = Node::with_seq("AAA", 2);
        n0.set_population(Population::with_indices(3, &[1, 2]));
        let mut n1 = Node::with_seq("CCC", 5);
        n1.set_af(0.4);
        n1.set_population(Population::with_indices(3, &[2]));
        let mut n2 = Node::with_seq("GGG", 5);
        n2.set_not_ref();
        n2.set_af(0.6);
        n2.set_population(Population::with_indices(3, &[1]));
        let mut n3 = Node::with_seq("TTTA", 9);
        n3.set_af(0.3);
        n3.set_population(Population::with_indices(3, &[1, 2]));
        Graph::assemble(vec![n0, n1, n2, n3], &[(0, 1), (0, 2), (1, 3), (2, 3)])
    }

    #[test]
    fn topology_and_positions() {
        let g = bubble_graph();
        assert_eq!(g.num_nodes(), 4);
        assert_eq!(g.num_edges(), 4);
        assert_eq!(g.root(), Some(0));
        assert_eq!(g.incoming(3), &[1, 2]);
        assert_eq!(g.incoming(0), &[] as &[NodeId]);
        assert!(!g.is_linear());
        assert_eq!(g.node(0).begin_pos(), 0);
        assert_eq!(g.node(3).begin_pos(), 6);
    }

    #[test]
    fn ref_derivation_is_idempotent() {
        let g = bubble_graph();
        let r = g.derive_ref().unwrap();
        assert_eq!(r.order(), &[0, 1, 3]);
        assert!(r.is_linear());
        let rr = r.derive_ref().unwrap();
        assert_eq!(rr.order(), r.order());
        assert_eq!(rr.next_map(), r.next_map());
    }

    #[test]
    fn maxaf_follows_frequency() {
        let g = bubble_graph();
        let m = g.derive_maxaf().unwrap();
        assert_eq!(m.order(), &[0, 2, 3]);
        assert!(m.is_linear());
        let mm = m.derive_maxaf().unwrap();
        assert_eq!(mm.order(), m.order());
    }

    #[test]
    fn filter_derivation() {
        let g = bubble_graph();
        let only_hap2 = Population::with_indices(3, &[2]);
        let f = g.derive_filter(&only_hap2).unwrap();
        assert_eq!(f.order(), &[0, 1, 3]);

        let only_hap0 = Population::with_indices(3, &[0]);
        assert!(g.derive_filter(&only_hap0).is_err());
    }

    #[test]
    fn population_bits() {
        let mut p = Population::new(70, false);
        p.set(0, true);
        p.set(69, true);
        assert_eq!(p.count_ones(), 2);
        assert!(p.get(69));
        assert!(!p.get(68));
        assert_eq!(p.indices(), vec![0, 69]);

        let full = Population::new(70, true);
        assert_eq!(full.count_ones(), 70);
        assert!(full.intersects(&p));
        assert!(!Population::new(70, false).intersects(&p));
    }

    #[test]
    fn statistics_and_dot() {
        let g = bubble_graph();
        let stat = g.statistics();
        assert_eq!(stat.num_nodes, 4);
        assert_eq!(stat.total_length, 13);
        assert_eq!(stat.num_snps, 0);
        assert_eq!(stat.num_other, 1);

        let dot = g.to_dot("test");
        assert!(dot.contains("digraph \"test\""));
        assert!(dot.contains("n0 -> n2;"));
        assert!(dot.contains("TTTA"));
    }
}
