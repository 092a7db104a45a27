//! The dependence graph: one node per statement domain, typed edges
//! between them, and the per-node change of basis that keeps new schedule
//! rows linearly independent of the rows found so far.

use hashbrown::HashMap;
use petgraph::graph::DiGraph;

use pst_core::error::{PstError, PstResult};
use pst_core::map::{Map, Set};
use pst_core::mat::Mat;
use pst_core::space::Space;

use super::lp::DualCache;

/// The five kinds of scheduling constraints an edge can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    Validity,
    Coincidence,
    Proximity,
    Condition,
    ConditionalValidity,
}

pub const EDGE_TYPES: [EdgeType; 5] = [
    EdgeType::Validity,
    EdgeType::Coincidence,
    EdgeType::Proximity,
    EdgeType::Condition,
    EdgeType::ConditionalValidity,
];

impl EdgeType {
    pub fn index(self) -> usize {
        match self {
            EdgeType::Validity => 0,
            EdgeType::Coincidence => 1,
            EdgeType::Proximity => 2,
            EdgeType::Condition => 3,
            EdgeType::ConditionalValidity => 4,
        }
    }
}

/// Scheduling state of one statement.
#[derive(Debug, Clone)]
pub struct SchedNode {
    /// Set space of the statement domain.
    pub space: Space,
    /// Schedule rows found so far, each `[c0 | params | vars]`.
    pub sched: Mat,
    /// Number of linearly independent rows in the linear part of `sched`.
    pub rank: usize,
    /// Change of basis: candidate coefficients `c = cmap * t`.
    pub cmap: Mat,
    /// Inverse basis: `t = cinv * c`.
    pub cinv: Mat,
    /// First LP column of this node's coefficient block.
    pub start: usize,
    pub nvar: usize,
    pub nparam: usize,
    /// Component index from the most recent SCC/WCC detection.
    pub scc: usize,
    /// Band index per schedule row; -1 for padding rows.
    pub band: Vec<i32>,
    /// Distinguishes sibling bands at the same level.
    pub band_id: Vec<i32>,
    /// Per-row coincidence marking.
    pub coincident: Vec<bool>,
}

impl SchedNode {
    /// Recompute the change of basis from the current schedule. The first
    /// `rank` rows of `cinv` applied to a coefficient vector recover its
    /// expression in previously found rows; components past `rank` witness
    /// linear independence.
    pub fn update_cmap(&mut self) -> PstResult<()> {
        let n_row = self.sched.n_row();
        let linear = self.sched.sub_matrix(0, n_row, 1 + self.nparam, self.nvar);
        let (h, u, q) = linear.left_hermite()?;
        self.cmap = q.transpose();
        self.cinv = u.transpose();
        self.rank = h.initial_non_zero_cols();
        Ok(())
    }
}

/// A dependence edge. One edge may stand for several constraint types at
/// once when their relations coincide.
#[derive(Debug, Clone)]
pub struct SchedEdge {
    pub map: Map,
    /// Tagged relations behind condition constraints, kept for the
    /// conditional-validity checks.
    pub tagged_condition: Vec<Map>,
    /// Tagged relations behind conditional-validity constraints.
    pub tagged_validity: Vec<Map>,
    pub src: usize,
    pub dst: usize,
    pub validity: bool,
    pub coincidence: bool,
    pub proximity: bool,
    pub local: bool,
    pub condition: bool,
    pub conditional_validity: bool,
    /// Row ranges this edge occupies in the most recent LP.
    pub lp_ineq_range: (usize, usize),
    pub lp_eq_range: (usize, usize),
}

impl SchedEdge {
    pub fn is_empty(&self) -> bool {
        self.map.parts.is_empty()
    }
}

type NodeKey = (Option<String>, usize);

/// The dependence graph plus all scheduling bookkeeping shared by the
/// driver: band counters, the LP coefficient duals cache, and the SCC pair
/// recorded when the LP reports a conflict.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: Vec<SchedNode>,
    pub edges: Vec<SchedEdge>,
    /// Node indices ordered by component.
    pub sorted: Vec<usize>,
    /// Per type, the edge reachable from a `(src, dst)` pair. Edges whose
    /// relation becomes empty are pruned from the tables but stay in the
    /// edge list so indices remain stable.
    pub edge_tables: [HashMap<(usize, usize), usize>; 5],
    node_table: HashMap<NodeKey, usize>,
    /// Cached duals of dependence relations.
    pub(crate) dual_cache: DualCache,
    pub maxvar: usize,
    pub max_row: usize,
    pub n_row: usize,
    pub n_total_row: usize,
    pub n_band: usize,
    pub band_start: usize,
    pub scc: usize,
    pub src_scc: i32,
    pub dst_scc: i32,
}

impl Graph {
    pub fn n(&self) -> usize {
        self.nodes.len()
    }

    fn node_key(space: &Space) -> NodeKey {
        (space.output.name.clone(), space.output.dim)
    }

    pub fn add_node(&mut self, space: Space, nvar: usize, nparam: usize) {
        let idx = self.nodes.len();
        self.node_table.insert(Self::node_key(&space), idx);
        self.nodes.push(SchedNode {
            space,
            sched: Mat::zero(0, 1 + nparam + nvar),
            rank: 0,
            cmap: Mat::identity(nvar),
            cinv: Mat::identity(nvar),
            start: 0,
            nvar,
            nparam,
            scc: 0,
            band: vec![-1; self.max_row],
            band_id: vec![0; self.max_row],
            coincident: vec![false; self.max_row],
        });
        self.sorted.push(idx);
    }

    /// Register an already-built node, as when extracting a subgraph.
    pub fn push_node(&mut self, node: SchedNode) {
        let idx = self.nodes.len();
        self.node_table.insert(Self::node_key(&node.space), idx);
        self.sorted.push(idx);
        self.nodes.push(node);
    }

    pub fn find_node(&self, name: &Option<String>, dim: usize) -> Option<usize> {
        self.node_table.get(&(name.clone(), dim)).copied()
    }

    pub fn edge_table_add(&mut self, ty: EdgeType, edge_idx: usize) {
        let e = &self.edges[edge_idx];
        self.edge_tables[ty.index()].insert((e.src, e.dst), edge_idx);
    }

    pub fn find_edge(&self, ty: EdgeType, src: usize, dst: usize) -> Option<usize> {
        self.edge_tables[ty.index()].get(&(src, dst)).copied()
    }

    pub fn has_edge(&self, ty: EdgeType, src: usize, dst: usize) -> bool {
        self.find_edge(ty, src, dst)
            .map_or(false, |e| !self.edges[e].is_empty())
    }

    /// Drop an emptied edge from every table that points at it.
    pub fn remove_edge_from_tables(&mut self, edge_idx: usize) {
        let key = (self.edges[edge_idx].src, self.edges[edge_idx].dst);
        for table in self.edge_tables.iter_mut() {
            if table.get(&key) == Some(&edge_idx) {
                table.remove(&key);
            }
        }
    }

    pub fn has_any_edge(&self, src: usize, dst: usize) -> bool {
        EDGE_TYPES.iter().any(|&t| self.has_edge(t, src, dst))
    }

    /// Validity for component detection includes conditional validity;
    /// those edges cannot be ignored before their conditions are settled.
    pub fn has_validity_edge(&self, src: usize, dst: usize) -> bool {
        self.has_edge(EdgeType::Validity, src, dst)
            || self.has_edge(EdgeType::ConditionalValidity, src, dst)
    }

    /// Component detection. With `weak` set the graph is treated as
    /// undirected and every edge type counts; otherwise only (conditional)
    /// validity edges direct the strongly connected components. Component
    /// indices are assigned in topological order of the condensation, so
    /// an edge between components always goes from a lower to a higher
    /// index.
    pub fn detect_ccs(&mut self, weak: bool) {
        let mut g: DiGraph<(), ()> = DiGraph::new();
        let idx: Vec<_> = (0..self.n()).map(|_| g.add_node(())).collect();
        for i in 0..self.n() {
            for j in 0..self.n() {
                if i == j {
                    continue;
                }
                let connected = if weak {
                    self.has_any_edge(i, j)
                } else {
                    self.has_validity_edge(i, j)
                };
                if connected {
                    g.add_edge(idx[i], idx[j], ());
                    if weak {
                        g.add_edge(idx[j], idx[i], ());
                    }
                }
            }
        }
        let mut sccs = petgraph::algo::tarjan_scc(&g);
        sccs.reverse();
        self.scc = sccs.len();
        for (comp, members) in sccs.iter().enumerate() {
            for &m in members {
                self.nodes[m.index()].scc = comp;
            }
        }
    }

    pub fn detect_sccs(&mut self) {
        self.detect_ccs(false)
    }

    pub fn detect_wccs(&mut self) {
        self.detect_ccs(true)
    }

    pub fn sort_sccs(&mut self) {
        let nodes = &self.nodes;
        self.sorted.sort_by_key(|&i| nodes[i].scc);
    }

    /// The maximal number of linearly independent rows still needed over
    /// all nodes, counting rows already found.
    pub fn compute_maxvar(&mut self) -> PstResult<()> {
        self.maxvar = 0;
        for i in 0..self.n() {
            self.nodes[i].update_cmap()?;
            let node = &self.nodes[i];
            let nvar = node.nvar + self.n_row - node.rank;
            if nvar > self.maxvar {
                self.maxvar = nvar;
            }
        }
        Ok(())
    }

    /// Must the next row of this node be linearly independent? Once the
    /// remaining required rows equal the remaining rows to be computed,
    /// every further row must be non-trivial.
    pub fn needs_row(&self, node: &SchedNode) -> bool {
        node.nvar - node.rank >= self.maxvar - self.n_row
    }

    pub fn any_validity_edges(&self) -> bool {
        self.edges
            .iter()
            .any(|e| !e.is_empty() && (e.validity || e.conditional_validity))
    }

    pub fn any_coincidence(&self) -> bool {
        self.edges.iter().any(|e| e.coincidence)
    }

    pub fn clear_local_edges(&mut self) {
        for e in self.edges.iter_mut() {
            if e.condition {
                e.local = false;
            }
        }
    }

    /// Are both condition and conditional-validity edges present?
    pub fn needs_condition_check(&self) -> bool {
        let any_condition = self.edges.iter().any(|e| e.condition);
        let any_conditional = self.edges.iter().any(|e| e.conditional_validity);
        any_condition && any_conditional
    }
}

/// Statement domains and the five typed dependence unions from which a
/// schedule is computed.
#[derive(Debug, Clone)]
pub struct ScheduleConstraints {
    pub domain: Vec<Set>,
    pub validity: Vec<Map>,
    pub coincidence: Vec<Map>,
    pub proximity: Vec<Map>,
    /// Tagged condition relations; tags name the references involved.
    pub condition: Vec<Map>,
    /// Tagged conditional-validity relations.
    pub conditional_validity: Vec<Map>,
}

impl ScheduleConstraints {
    pub fn on_domain(domain: Vec<Set>) -> Self {
        ScheduleConstraints {
            domain,
            validity: Vec::new(),
            coincidence: Vec::new(),
            proximity: Vec::new(),
            condition: Vec::new(),
            conditional_validity: Vec::new(),
        }
    }

    pub fn set_validity(mut self, validity: Vec<Map>) -> Self {
        self.validity = validity;
        self
    }

    pub fn set_coincidence(mut self, coincidence: Vec<Map>) -> Self {
        self.coincidence = coincidence;
        self
    }

    pub fn set_proximity(mut self, proximity: Vec<Map>) -> Self {
        self.proximity = proximity;
        self
    }

    pub fn set_conditional_validity(mut self, condition: Vec<Map>, validity: Vec<Map>) -> Self {
        self.condition = condition;
        self.conditional_validity = validity;
        self
    }

    fn unions(&self) -> [(&[Map], EdgeType); 5] {
        [
            (self.validity.as_slice(), EdgeType::Validity),
            (self.coincidence.as_slice(), EdgeType::Coincidence),
            (self.proximity.as_slice(), EdgeType::Proximity),
            (self.condition.as_slice(), EdgeType::Condition),
            (
                self.conditional_validity.as_slice(),
                EdgeType::ConditionalValidity,
            ),
        ]
    }
}

/// Build the dependence graph: one node per domain set, edges folded so
/// that identical relations across constraint types share one edge with
/// several flags.
pub fn extract_graph(sc: &ScheduleConstraints, parametric: bool) -> PstResult<Graph> {
    let mut graph = Graph::default();

    let mut maxvar = 0;
    for set in &sc.domain {
        maxvar = maxvar.max(set.space.n_out());
    }
    graph.max_row = sc.domain.len() + 2 * maxvar;

    for set in &sc.domain {
        let space = set.space.clone();
        let nvar = space.n_out();
        let nparam = if parametric { space.nparam } else { 0 };
        if graph.find_node(&space.output.name, nvar).is_some() {
            return Err(PstError::internal("duplicate statement domain"));
        }
        graph.add_node(space, nvar, nparam);
    }

    for (union, ty) in sc.unions() {
        for map in union {
            extract_edge(&mut graph, map, ty)?;
        }
    }

    Ok(graph)
}

fn extract_edge(graph: &mut Graph, map: &Map, ty: EdgeType) -> PstResult<()> {
    let tagged = matches!(ty, EdgeType::Condition | EdgeType::ConditionalValidity);
    let mut untagged = map.clone();
    if tagged {
        untagged.space = untagged.space.untagged();
        for p in untagged.parts.iter_mut() {
            p.space = p.space.untagged();
        }
    }

    let src = graph.find_node(&untagged.space.input.name, untagged.space.n_in());
    let dst = graph.find_node(&untagged.space.output.name, untagged.space.n_out());
    let (Some(src), Some(dst)) = (src, dst) else {
        return Ok(());
    };

    // Fold into an existing edge carrying the identical relation.
    for t in EDGE_TYPES {
        let Some(idx) = graph.find_edge(t, src, dst) else {
            continue;
        };
        if !graph.edges[idx].map.plain_equal(&untagged) {
            continue;
        }
        merge_edge(&mut graph.edges[idx], ty, map);
        graph.edge_table_add(ty, idx);
        return Ok(());
    }

    let mut edge = SchedEdge {
        map: untagged,
        tagged_condition: Vec::new(),
        tagged_validity: Vec::new(),
        src,
        dst,
        validity: false,
        coincidence: false,
        proximity: false,
        local: false,
        condition: false,
        conditional_validity: false,
        lp_ineq_range: (0, 0),
        lp_eq_range: (0, 0),
    };
    merge_edge(&mut edge, ty, map);
    graph.edges.push(edge);
    let idx = graph.edges.len() - 1;
    graph.edge_table_add(ty, idx);
    Ok(())
}

fn merge_edge(edge: &mut SchedEdge, ty: EdgeType, tagged_map: &Map) {
    match ty {
        EdgeType::Validity => edge.validity = true,
        EdgeType::Coincidence => edge.coincidence = true,
        EdgeType::Proximity => edge.proximity = true,
        EdgeType::Condition => {
            edge.condition = true;
            edge.tagged_condition.push(tagged_map.clone());
        }
        EdgeType::ConditionalValidity => {
            edge.conditional_validity = true;
            edge.tagged_validity.push(tagged_map.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pst_core::map::BasicMap;
    use pst_core::space::Tuple;

    fn domain(name: &str, n: i64) -> Set {
        let space = Space::set(0, Tuple::named(name, 1));
        Map::from_basic_map(BasicMap::from_constraints(
            space,
            vec![],
            vec![vec![0, 1], vec![n - 1, -1]],
        ))
    }

    fn relation(src: &str, dst: &str) -> Map {
        let space = Space::map(0, Tuple::named(src, 1), Tuple::named(dst, 1));
        let mut bmap = BasicMap::universe(space);
        bmap.add_eq(vec![0, 1, -1]);
        Map::from_basic_map(bmap)
    }

    #[test]
    fn test_extract_merges_identical_relations() {
        let sc = ScheduleConstraints::on_domain(vec![domain("A", 10), domain("B", 10)])
            .set_validity(vec![relation("A", "B")])
            .set_proximity(vec![relation("A", "B")]);
        let graph = extract_graph(&sc, true).unwrap();
        assert_eq!(graph.n(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert!(graph.edges[0].validity && graph.edges[0].proximity);
    }

    #[test]
    fn test_scc_order_is_topological() {
        let sc = ScheduleConstraints::on_domain(vec![
            domain("A", 10),
            domain("B", 10),
            domain("C", 10),
        ])
        .set_validity(vec![relation("B", "C"), relation("A", "B")]);
        let mut graph = extract_graph(&sc, true).unwrap();
        graph.detect_sccs();
        assert_eq!(graph.scc, 3);
        let scc_of = |name: &str| {
            let i = graph.find_node(&Some(name.to_string()), 1).unwrap();
            graph.nodes[i].scc
        };
        assert!(scc_of("A") < scc_of("B"));
        assert!(scc_of("B") < scc_of("C"));
    }

    #[test]
    fn test_wcc_ignores_direction() {
        let sc = ScheduleConstraints::on_domain(vec![domain("A", 10), domain("B", 10)])
            .set_proximity(vec![relation("B", "A")]);
        let mut graph = extract_graph(&sc, true).unwrap();
        graph.detect_wccs();
        assert_eq!(graph.scc, 1);
        graph.detect_sccs();
        assert_eq!(graph.scc, 2);
    }

    #[test]
    fn test_update_cmap_rank() {
        let sc = ScheduleConstraints::on_domain(vec![domain("A", 10)]);
        let mut graph = extract_graph(&sc, true).unwrap();
        let node = &mut graph.nodes[0];
        node.sched.add_rows(1);
        *node.sched.row_mut(0) = vec![0, 1];
        node.update_cmap().unwrap();
        assert_eq!(node.rank, 1);
    }
}
