//! Affine schedule computation.
//!
//! Given statement domains and typed dependence relations, compute a
//! multi-dimensional affine schedule per statement that respects every
//! validity dependence, keeps proximity distances small, and marks rows
//! whose coincidence distances are all zero.
//!
//! The driver works per weakly connected component. Inside a component it
//! repeatedly asks the ILP for one more schedule row that is linearly
//! independent of the rows already found for every node that still needs
//! rows. When no such row exists it either drops the coincidence
//! requirement, closes the band, splits the component between two
//! strongly connected components that the LP reported as conflicting, or
//! builds a carry LP that forces at least one dependence to be fully
//! carried so that progress resumes in the next band. Conditional
//! validity constraints are re-checked after every row; a violation turns
//! the adjacent condition edges into hard zero-distance constraints and
//! recomputes the current band.
//!
//! The approach follows Bondhugula et al., "Automatic Transformations for
//! Communication-Minimized Parallelization and Locality Optimization in
//! the Polyhedral Model".

pub mod graph;
mod lp;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use pst_core::error::{PstError, PstResult};
use pst_core::map::{BasicMap, BasicSet, Map};
use pst_core::mat::Mat;
use pst_core::space::{Space, Tuple};
use pst_core::{Context, FuseStrategy, ScheduleAlgorithm};

use self::graph::{extract_graph, Graph, SchedEdge, ScheduleConstraints, EDGE_TYPES};

/// A band in the derived forest view: a run of schedule rows of the
/// member statements for which a common tiling transformation is sought.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Band {
    /// First schedule row of the band.
    pub start: usize,
    /// One past the last schedule row.
    pub end: usize,
    /// Per-row coincidence marking.
    pub coincident: Vec<bool>,
    /// Indices into [`Schedule::nodes`] of the statements in this band.
    pub members: Vec<usize>,
    pub children: Vec<Band>,
}

/// Per-statement result: the schedule matrix plus band structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleNodeResult {
    pub space: Space,
    pub nparam: usize,
    /// Rows `[c0 | params | vars]`, one per schedule dimension.
    pub sched: Mat,
    /// Row index at which each band of this node ends.
    pub band_end: Vec<usize>,
    pub band_id: Vec<i32>,
    pub coincident: Vec<bool>,
}

impl ScheduleNodeResult {
    pub fn n_band(&self) -> usize {
        self.band_end.len()
    }

    /// The schedule as a relation from domain points to time points.
    pub fn as_map(&self, n_total_row: usize) -> Map {
        let nvar = self.space.n_out();
        let space = Space::map(
            self.space.nparam,
            self.space.output.clone(),
            Tuple::anonymous(n_total_row),
        );
        let mut bmap = BasicMap::universe(space.clone());
        for r in 0..n_total_row {
            let mut row = vec![0i64; 1 + space.dim()];
            row[0] = self.sched.get(r, 0);
            for p in 0..self.nparam {
                row[1 + p] = self.sched.get(r, 1 + p);
            }
            for v in 0..nvar {
                row[1 + space.nparam + v] = self.sched.get(r, 1 + self.nparam + v);
            }
            row[1 + space.nparam + nvar + r] = -1;
            bmap.add_eq(row);
        }
        Map::from_basic_map(bmap)
    }
}

/// A computed schedule: per-statement affine rows plus the band structure,
/// with the forest view derived lazily on first access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schedule {
    pub nodes: Vec<ScheduleNodeResult>,
    pub n_total_row: usize,
    pub n_band: usize,
    #[serde(skip)]
    forest: OnceCell<Vec<Band>>,
}

impl Schedule {
    /// The whole schedule as one relation per statement, all padded to a
    /// common dimensionality.
    pub fn maps(&self) -> Vec<Map> {
        self.nodes
            .iter()
            .map(|n| n.as_map(self.n_total_row))
            .collect()
    }

    /// The band forest: bands grouped by position and band id, children
    /// below their enclosing band.
    pub fn band_forest(&self) -> &[Band] {
        self.forest.get_or_init(|| {
            let active: Vec<bool> = vec![true; self.nodes.len()];
            self.construct_band_list(&active, 0)
        })
    }

    /// Visit every band in depth-first post-order.
    pub fn foreach_band(&self, f: &mut impl FnMut(&Band)) {
        fn visit(bands: &[Band], f: &mut impl FnMut(&Band)) {
            for b in bands {
                visit(&b.children, f);
                f(b);
            }
        }
        visit(self.band_forest(), f);
    }

    fn construct_band(&self, active: &[bool], band_nr: usize) -> Band {
        let i = active
            .iter()
            .position(|&a| a)
            .expect("band without active statements");
        let node = &self.nodes[i];
        let start = if band_nr > 0 {
            node.band_end[band_nr - 1]
        } else {
            0
        };
        let end = if band_nr < node.n_band() {
            node.band_end[band_nr]
        } else {
            start
        };
        let members: Vec<usize> = active
            .iter()
            .enumerate()
            .filter(|(_, &a)| a)
            .map(|(j, _)| j)
            .collect();
        let children = if members
            .iter()
            .any(|&j| self.nodes[j].n_band() > band_nr + 1)
        {
            self.construct_band_list(active, band_nr + 1)
        } else {
            Vec::new()
        };
        Band {
            start,
            end,
            coincident: node.coincident[start..end].to_vec(),
            members,
            children,
        }
    }

    fn construct_band_list(&self, parent_active: &[bool], band_nr: usize) -> Vec<Band> {
        // Group the active nodes by the band id at this level; nodes whose
        // schedule has no band here become childless singletons.
        let mut ids: Vec<i32> = Vec::new();
        for (j, &a) in parent_active.iter().enumerate() {
            if !a || self.nodes[j].n_band() <= band_nr {
                continue;
            }
            let id = self.nodes[j].band_id[band_nr];
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        let n_short = parent_active
            .iter()
            .enumerate()
            .filter(|(j, &a)| a && self.nodes[*j].n_band() <= band_nr)
            .count();

        if ids.len() + n_short == 1 {
            return vec![self.construct_band(parent_active, band_nr)];
        }

        let mut list = Vec::new();
        for &id in &ids {
            let active: Vec<bool> = parent_active
                .iter()
                .enumerate()
                .map(|(j, &a)| {
                    a && self.nodes[j].n_band() > band_nr && self.nodes[j].band_id[band_nr] == id
                })
                .collect();
            if active.iter().any(|&a| a) {
                list.push(self.construct_band(&active, band_nr));
            }
        }
        for (j, &a) in parent_active.iter().enumerate() {
            if !a || self.nodes[j].n_band() > band_nr {
                continue;
            }
            let active: Vec<bool> = (0..self.nodes.len()).map(|x| x == j).collect();
            list.push(self.construct_band(&active, band_nr));
        }
        list
    }
}

impl ScheduleConstraints {
    /// Compute a schedule respecting these constraints.
    pub fn compute_schedule(&self, ctx: &Context) -> PstResult<Schedule> {
        compute_schedule(ctx, self)
    }
}

/// Compute a schedule on the constraint set's domain that respects all
/// validity dependences, minimizes proximity distances, and marks
/// coincident rows.
pub fn compute_schedule(ctx: &Context, sc: &ScheduleConstraints) -> PstResult<Schedule> {
    if sc.domain.is_empty() {
        return Ok(Schedule::default());
    }
    let mut graph = extract_graph(sc, ctx.options.schedule_parametric)?;
    schedule_graph(ctx, &mut graph)?;
    Ok(extract_result(&graph))
}

/// Schedule the graph, component by component. Weak components by
/// default; strongly connected components under minimal fusion.
fn schedule_graph(ctx: &Context, graph: &mut Graph) -> PstResult<()> {
    match ctx.options.schedule_fuse {
        FuseStrategy::Min => graph.detect_sccs(),
        FuseStrategy::Max => graph.detect_wccs(),
    }
    if graph.scc > 1 {
        return compute_component_schedule(ctx, graph);
    }
    compute_schedule_wcc(ctx, graph)
}

/// Schedule one connected component: find as many tilable rows as
/// possible, then close the band and continue on whatever dependences
/// remain.
fn compute_schedule_wcc(ctx: &Context, graph: &mut Graph) -> PstResult<()> {
    graph.detect_sccs();
    graph.sort_sccs();
    graph.compute_maxvar()?;

    if ctx.options.schedule_algorithm == ScheduleAlgorithm::Feautrier
        && graph.any_validity_edges()
    {
        return carry_dependences(ctx, graph);
    }

    graph.clear_local_edges();
    let check_conditional = graph.needs_condition_check();
    let has_coincidence = graph.any_coincidence();
    let force_coincidence = ctx.options.schedule_outer_coincidence;
    let mut use_coincidence = has_coincidence;

    while graph.n_row < graph.maxvar {
        graph.src_scc = -1;
        graph.dst_scc = -1;

        let prob = lp::setup_lp(ctx, graph, use_coincidence)?;
        let sol = lp::solve_lp(graph, &prob)?;
        let Some(sol) = sol else {
            let empty_band = graph.n_total_row == graph.band_start;
            if use_coincidence && (!force_coincidence || !empty_band) {
                use_coincidence = false;
                continue;
            }
            if !ctx.options.schedule_maximize_band_depth && !empty_band {
                return compute_next_band(ctx, graph);
            }
            if graph.src_scc >= 0 {
                return compute_split_schedule(ctx, graph);
            }
            if !empty_band {
                return compute_next_band(ctx, graph);
            }
            return carry_dependences(ctx, graph);
        };

        let coincident = !has_coincidence || use_coincidence;
        update_schedule(graph, &sol, true, coincident)?;

        if !check_conditional {
            continue;
        }
        if has_violated_conditional_constraint(graph)? {
            reset_band(graph)?;
            use_coincidence = has_coincidence;
        }
    }

    if graph.n_total_row > graph.band_start {
        next_band(graph);
    }
    sort_statements(graph)
}

/// Append the solved row to every node's schedule. The solution encodes
/// each coefficient as a non-negative pair; with `use_cmap` the variable
/// part is expressed in the node basis and mapped back.
fn update_schedule(
    graph: &mut Graph,
    sol: &[i64],
    use_cmap: bool,
    coincident: bool,
) -> PstResult<()> {
    if graph.n_total_row >= graph.max_row {
        return Err(PstError::internal("too many schedule rows"));
    }
    let n_band = graph.n_band as i32;
    let n_total_row = graph.n_total_row;
    for node in graph.nodes.iter_mut() {
        let pos = node.start;
        let row = node.sched.n_row();
        node.sched.add_rows(1);
        node.sched.set(row, 0, sol[pos]);
        for j in 0..node.nparam {
            let v = sol[pos + 1 + 2 * j + 1] - sol[pos + 1 + 2 * j];
            node.sched.set(row, 1 + j, v);
        }
        let mut csol = Vec::with_capacity(node.nvar);
        for j in 0..node.nvar {
            let base = pos + 1 + 2 * (node.nparam + j);
            csol.push(sol[base + 1] - sol[base]);
        }
        if use_cmap {
            csol = node.cmap.vec_product(&csol)?;
        }
        for (j, &v) in csol.iter().enumerate() {
            node.sched.set(row, 1 + node.nparam + j, v);
        }
        node.band[n_total_row] = n_band;
        node.coincident[n_total_row] = coincident;
    }
    graph.n_row += 1;
    graph.n_total_row += 1;
    Ok(())
}

fn next_band(graph: &mut Graph) {
    graph.band_start = graph.n_total_row;
    graph.n_band += 1;
}

/// Drop all rows of the current band.
fn reset_band(graph: &mut Graph) -> PstResult<()> {
    let drop = graph.n_total_row - graph.band_start;
    graph.n_total_row -= drop;
    graph.n_row -= drop;
    let band_start = graph.band_start;
    for node in graph.nodes.iter_mut() {
        node.sched.drop_rows(band_start, drop);
    }
    Ok(())
}

/// Equality rows expressing that source and sink execute in the same
/// iteration of the schedule built so far, over the given relation space.
fn specializer_rows(graph: &Graph, src: usize, dst: usize, part: &BasicMap) -> Vec<Vec<i64>> {
    let n_rows = graph.nodes[src].sched.n_row();
    let mut rows = Vec::with_capacity(n_rows);
    for r in 0..n_rows {
        rows.push(schedule_diff_row(graph, src, dst, part, r, 0));
    }
    rows
}

/// The row `src_row(x) - dst_row(y) + shift` over the space of `part`.
fn schedule_diff_row(
    graph: &Graph,
    src: usize,
    dst: usize,
    part: &BasicMap,
    r: usize,
    shift: i64,
) -> Vec<i64> {
    let s = &graph.nodes[src];
    let d = &graph.nodes[dst];
    let nparam = part.space.nparam;
    let n_in = part.space.n_in();
    let n_out = part.space.n_out();
    let mut row = vec![0i64; part.row_len()];
    row[0] = s.sched.get(r, 0) - d.sched.get(r, 0) + shift;
    for p in 0..nparam {
        let sv = if p < s.nparam { s.sched.get(r, 1 + p) } else { 0 };
        let dv = if p < d.nparam { d.sched.get(r, 1 + p) } else { 0 };
        row[1 + p] = sv - dv;
    }
    for v in 0..n_in {
        row[1 + nparam + v] = s.sched.get(r, 1 + s.nparam + v);
    }
    for v in 0..n_out {
        row[1 + nparam + n_in + v] = -d.sched.get(r, 1 + d.nparam + v);
    }
    row
}

/// Intersect every edge's relation with equality of the current
/// schedules, dropping the parts (and, from the lookup tables, whole
/// edges) that the schedule already carries completely.
fn update_edges(graph: &mut Graph) -> PstResult<()> {
    for e in (0..graph.edges.len()).rev() {
        update_edge(graph, e)?;
    }
    Ok(())
}

fn intersect_with_schedule(graph: &Graph, src: usize, dst: usize, map: &Map) -> PstResult<Map> {
    let mut out = Map::empty(map.space.clone());
    for part in &map.parts {
        let mut p = part.clone();
        for row in specializer_rows(graph, src, dst, part) {
            p.add_eq(row);
        }
        p.gauss()?;
        if !p.is_empty()? {
            out.add_part(p);
        }
    }
    Ok(out)
}

fn update_edge(graph: &mut Graph, e: usize) -> PstResult<()> {
    let (src, dst) = (graph.edges[e].src, graph.edges[e].dst);

    let map = graph.edges[e].map.clone();
    graph.edges[e].map = intersect_with_schedule(graph, src, dst, &map)?;

    let tagged_condition = graph.edges[e].tagged_condition.clone();
    let mut new_cond = Vec::with_capacity(tagged_condition.len());
    for m in &tagged_condition {
        new_cond.push(intersect_with_schedule(graph, src, dst, m)?);
    }
    graph.edges[e].tagged_condition = new_cond;

    let tagged_validity = graph.edges[e].tagged_validity.clone();
    let mut new_val = Vec::with_capacity(tagged_validity.len());
    for m in &tagged_validity {
        new_val.push(intersect_with_schedule(graph, src, dst, m)?);
    }
    graph.edges[e].tagged_validity = new_val;

    if graph.edges[e].map.parts.is_empty() {
        graph.remove_edge_from_tables(e);
    }
    Ok(())
}

/// Statements mapped to the same iteration by the schedule so far are
/// ordered by a final row of component indices.
fn sort_statements(graph: &mut Graph) -> PstResult<()> {
    if graph.n() <= 1 {
        return Ok(());
    }
    update_edges(graph)?;
    if graph.edges.is_empty() {
        return Ok(());
    }
    graph.detect_sccs();

    if graph.n_total_row >= graph.max_row {
        return Err(PstError::internal("too many schedule rows"));
    }

    let n_band = graph.n_band as i32;
    let n_total_row = graph.n_total_row;
    for node in graph.nodes.iter_mut() {
        let row = node.sched.n_row();
        node.sched.add_rows(1);
        node.sched.set(row, 0, node.scc as i64);
        node.band[n_total_row] = n_band;
    }
    graph.n_total_row += 1;
    next_band(graph);
    Ok(())
}

/// Close the band and continue scheduling the remaining dependences.
fn compute_next_band(ctx: &Context, graph: &mut Graph) -> PstResult<()> {
    update_edges(graph)?;
    next_band(graph);
    schedule_graph(ctx, graph)
}

/// Build a subgraph from the kept nodes and edges, schedule it, and copy
/// the results back.
fn compute_sub_schedule(
    ctx: &Context,
    graph: &mut Graph,
    node_keep: &[bool],
    edge_keep: &[bool],
    wcc: bool,
) -> PstResult<()> {
    let mut split = Graph::default();
    split.max_row = graph.max_row;
    split.n_row = graph.n_row;
    split.n_total_row = graph.n_total_row;
    split.n_band = graph.n_band;
    split.band_start = graph.band_start;

    let mut node_map = vec![usize::MAX; graph.n()];
    for (i, node) in graph.nodes.iter().enumerate() {
        if node_keep[i] {
            node_map[i] = split.n();
            split.push_node(node.clone());
        }
    }

    for (idx, edge) in graph.edges.iter().enumerate() {
        if !edge_keep[idx] || edge.map.parts.is_empty() {
            continue;
        }
        let (s, d) = (node_map[edge.src], node_map[edge.dst]);
        if s == usize::MAX || d == usize::MAX {
            if edge.validity || edge.conditional_validity {
                return Err(PstError::internal("backward validity edge in split"));
            }
            continue;
        }
        let mut e = edge.clone();
        e.src = s;
        e.dst = d;
        e.lp_ineq_range = (0, 0);
        e.lp_eq_range = (0, 0);
        split.edges.push(e);
        let new_idx = split.edges.len() - 1;
        for t in EDGE_TYPES {
            if graph.find_edge(t, edge.src, edge.dst) == Some(idx) {
                split.edge_table_add(t, new_idx);
            }
        }
    }

    if wcc {
        compute_schedule_wcc(ctx, &mut split)?;
    } else {
        schedule_graph(ctx, &mut split)?;
    }

    let mut k = 0;
    for i in 0..graph.n() {
        if !node_keep[i] {
            continue;
        }
        graph.nodes[i].sched = split.nodes[k].sched.clone();
        graph.nodes[i].band = split.nodes[k].band.clone();
        graph.nodes[i].band_id = split.nodes[k].band_id.clone();
        graph.nodes[i].coincident = split.nodes[k].coincident.clone();
        k += 1;
    }
    graph.max_row = split.max_row;
    graph.n_total_row = split.n_total_row;
    graph.n_band = split.n_band;
    Ok(())
}

/// Split between the recorded pair of conflicting components: replace the
/// current band by a single 0/1 row and schedule the two halves
/// independently.
fn compute_split_schedule(ctx: &Context, graph: &mut Graph) -> PstResult<()> {
    if graph.n_total_row >= graph.max_row {
        return Err(PstError::internal("too many schedule rows"));
    }
    reset_band(graph)?;

    let src_scc = graph.src_scc as usize;
    let n_band = graph.n_band as i32;
    let n_total_row = graph.n_total_row;
    let mut n = 0;
    for node in graph.nodes.iter_mut() {
        let before = node.scc <= src_scc;
        if before {
            n += 1;
        }
        let row = node.sched.n_row();
        node.sched.add_rows(1);
        node.sched.set(row, 0, if before { 0 } else { 1 });
        node.band[n_total_row] = n_band;
        node.coincident[n_total_row] = false;
    }

    graph.n_total_row += 1;
    next_band(graph);

    let band_idx = graph.n_band;
    for node in graph.nodes.iter_mut() {
        if node.scc > src_scc && band_idx < node.band_id.len() {
            node.band_id[band_idx] = n as i32;
        }
    }

    let node_before: Vec<bool> = graph.nodes.iter().map(|nd| nd.scc <= src_scc).collect();
    let node_after: Vec<bool> = graph.nodes.iter().map(|nd| nd.scc > src_scc).collect();
    let edge_before: Vec<bool> = graph
        .edges
        .iter()
        .map(|e| graph.nodes[e.dst].scc <= src_scc)
        .collect();
    let edge_after: Vec<bool> = graph
        .edges
        .iter()
        .map(|e| graph.nodes[e.src].scc > src_scc)
        .collect();

    let orig_total_row = graph.n_total_row;
    let orig_band = graph.n_band;
    compute_sub_schedule(ctx, graph, &node_before, &edge_before, false)?;
    let first_total_row = graph.n_total_row;
    let first_band = graph.n_band;
    graph.n_total_row = orig_total_row;
    graph.n_band = orig_band;
    compute_sub_schedule(ctx, graph, &node_after, &edge_after, false)?;
    graph.n_total_row = graph.n_total_row.max(first_total_row);
    graph.n_band = graph.n_band.max(first_band);

    pad_schedule(graph)
}

/// Pad all schedules with zero rows up to the common row count; padding
/// rows belong to no band.
fn pad_schedule(graph: &mut Graph) -> PstResult<()> {
    let n_total_row = graph.n_total_row;
    for node in graph.nodes.iter_mut() {
        let rows = node.sched.n_row();
        if n_total_row > rows {
            node.sched.add_rows(n_total_row - rows);
            for j in rows..n_total_row {
                node.band[j] = -1;
            }
        }
    }
    Ok(())
}

/// Is the carry solution trivial on a node that needs progress? The
/// coefficients are checked against the node basis directly, without the
/// cmap encoding.
fn is_trivial(node: &graph::SchedNode, sol: &[i64]) -> PstResult<bool> {
    if node.nvar == node.rank {
        return Ok(false);
    }
    let pos = node.start + 1 + 2 * node.nparam;
    let mut csol = Vec::with_capacity(node.nvar);
    for i in 0..node.nvar {
        csol.push(sol[pos + 2 * i + 1] - sol[pos + 2 * i]);
    }
    let t = node.cinv.vec_product(&csol)?;
    Ok(t[node.rank..].iter().all(|&v| v == 0))
}

fn is_any_trivial(graph: &Graph, sol: &[i64]) -> PstResult<bool> {
    for node in &graph.nodes {
        if !graph.needs_row(node) {
            continue;
        }
        if is_trivial(node, sol)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Find schedule coefficients that fully carry as many dependences as
/// possible, then continue with the next band. Solved rationally; the
/// scaled row is repaired by `split_scaled` when all linear parts share a
/// divisor.
fn carry_dependences(ctx: &Context, graph: &mut Graph) -> PstResult<()> {
    let (prob, n_edge) = lp::setup_carry_lp(ctx, graph)?;
    let Some((denom, sol)) = prob.nonneg_lexmin()? else {
        return Err(PstError::internal("error in schedule construction"));
    };

    // sol[0] holds denom * (n_edge - sum e_i); nothing was carried when it
    // reaches n_edge.
    if sol[0] >= (n_edge as i64) * denom {
        return Err(PstError::unknown("unable to carry dependences"));
    }

    if is_any_trivial(graph, &sol)? {
        if graph.scc > 1 {
            return compute_component_schedule(ctx, graph);
        }
        return Err(PstError::unknown("unable to construct non-trivial solution"));
    }

    update_schedule(graph, &sol, false, false)?;
    split_scaled(ctx, graph)?;
    compute_next_band(ctx, graph)
}

/// After carrying, split off the constant term into its own band when the
/// linear parts of the latest row share a common divisor across all
/// nodes, and divide the linear part by it.
fn split_scaled(ctx: &Context, graph: &mut Graph) -> PstResult<()> {
    if !ctx.options.schedule_split_scaled {
        return Ok(());
    }
    if graph.n() <= 1 {
        return Ok(());
    }
    if graph.n_total_row >= graph.max_row {
        return Err(PstError::internal("too many schedule rows"));
    }

    let row = graph.nodes[0].sched.n_row() - 1;
    let mut gcd: i64 = 0;
    for node in &graph.nodes {
        gcd = num_integer::gcd(gcd, node.sched.row_gcd(row, 1));
    }
    if gcd <= 1 {
        return Ok(());
    }

    next_band(graph);
    let n_band = graph.n_band as i32;
    let n_total_row = graph.n_total_row;
    for node in graph.nodes.iter_mut() {
        node.sched.add_rows(1);
        let c = node.sched.get(row, 0);
        node.sched.set(row + 1, 0, c.rem_euclid(gcd));
        node.sched.set(row, 0, c.div_euclid(gcd) * gcd);
        node.sched.scale_down_row(row, gcd)?;
        node.band[n_total_row] = n_band;
    }
    graph.n_total_row += 1;
    Ok(())
}

/// Schedule each component separately and merge the row counts.
fn compute_component_schedule(ctx: &Context, graph: &mut Graph) -> PstResult<()> {
    if ctx.options.schedule_fuse == FuseStrategy::Min || ctx.options.schedule_separate_components
    {
        split_on_scc(graph)?;
    }

    let band_idx = graph.n_band;
    for node in graph.nodes.iter_mut() {
        if band_idx < node.band_id.len() {
            node.band_id[band_idx] += node.scc as i32;
        }
    }

    let orig_total_row = graph.n_total_row;
    let orig_band = graph.n_band;
    let mut n_total_row = 0;
    let mut n_band = 0;
    for comp in 0..graph.scc {
        let node_keep: Vec<bool> = graph.nodes.iter().map(|nd| nd.scc == comp).collect();
        let edge_keep: Vec<bool> = graph
            .edges
            .iter()
            .map(|e| graph.nodes[e.src].scc == comp && graph.nodes[e.dst].scc == comp)
            .collect();
        compute_sub_schedule(ctx, graph, &node_keep, &edge_keep, true)?;
        n_total_row = n_total_row.max(graph.n_total_row);
        graph.n_total_row = orig_total_row;
        n_band = n_band.max(graph.n_band);
        graph.n_band = orig_band;
    }
    graph.n_total_row = n_total_row;
    graph.n_band = n_band;

    pad_schedule(graph)
}

/// Add a component-index row and move to the next band.
fn split_on_scc(graph: &mut Graph) -> PstResult<()> {
    if graph.n_total_row >= graph.max_row {
        return Err(PstError::internal("too many schedule rows"));
    }
    let n_band = graph.n_band as i32;
    let n_total_row = graph.n_total_row;
    for node in graph.nodes.iter_mut() {
        let row = node.sched.n_row();
        node.sched.add_rows(1);
        node.sched.set(row, 0, node.scc as i64);
        node.band[n_total_row] = n_band;
    }
    graph.n_total_row += 1;
    next_band(graph);
    Ok(())
}

/// Is the conditional validity dependence of this edge ordered backwards
/// by the final schedule row?
fn is_violated(graph: &Graph, e: usize) -> PstResult<bool> {
    let edge = &graph.edges[e];
    let r = graph.nodes[edge.src].sched.n_row();
    if r == 0 {
        return Ok(false);
    }
    for part in &edge.map.parts {
        let row = schedule_diff_row(graph, edge.src, edge.dst, part, r - 1, -1);
        let mut p = part.clone();
        p.add_ineq(row);
        if !p.is_empty()? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Are the condition dependences of this edge all mapped to equal times
/// by the schedule built so far?
fn is_condition_false(graph: &Graph, edge: &SchedEdge) -> PstResult<bool> {
    let n_rows = graph.nodes[edge.src].sched.n_row();
    for tagged in &edge.tagged_condition {
        for part in &tagged.parts {
            for r in 0..n_rows {
                let mut base = part.clone();
                for prev in 0..r {
                    base.add_eq(schedule_diff_row(graph, edge.src, edge.dst, part, prev, 0));
                }
                for sign in [1i64, -1] {
                    let mut p = base.clone();
                    let mut row = schedule_diff_row(graph, edge.src, edge.dst, part, r, 0);
                    if sign < 0 {
                        pst_core::seq::neg(&mut row);
                    }
                    row[0] -= 1;
                    p.add_ineq(row);
                    if !p.is_empty()? {
                        return Ok(false);
                    }
                }
            }
        }
    }
    Ok(true)
}

/// A tagged instance set: the wrapped `(instance -> reference)` space is
/// identified by tuple plus tag, with the instance coordinates in the
/// basic set.
type TaggedSet = (Tuple, BasicSet);

fn sets_intersect(a: &(Tuple, BasicSet), b: &(Tuple, BasicSet)) -> PstResult<bool> {
    if a.0 != b.0 {
        return Ok(false);
    }
    let mut combined = a.1.clone();
    for row in &b.1.eqs {
        combined.add_eq(row.clone());
    }
    for row in &b.1.ineqs {
        combined.add_ineq(row.clone());
    }
    Ok(!combined.is_empty()?)
}

/// Mark as local every non-local condition edge adjacent to the violated
/// conditional validity constraints; report whether any of them is
/// actually satisfied (not local) under the current schedule.
fn has_adjacent_true_conditions(
    graph: &mut Graph,
    sources: &[TaggedSet],
    sinks: &[TaggedSet],
) -> PstResult<bool> {
    let mut any = false;
    for e in 0..graph.edges.len() {
        if !graph.edges[e].condition || graph.edges[e].local {
            continue;
        }
        let mut adjacent = false;
        'outer: for tagged in &graph.edges[e].tagged_condition {
            for part in &tagged.parts {
                let dom = (tagged.space.input.clone(), part.domain()?);
                for sink in sinks {
                    if sets_intersect(&dom, sink)? {
                        adjacent = true;
                        break 'outer;
                    }
                }
                let rng = (tagged.space.output.clone(), part.range()?);
                for source in sources {
                    if sets_intersect(&rng, source)? {
                        adjacent = true;
                        break 'outer;
                    }
                }
            }
        }
        if !adjacent {
            continue;
        }
        graph.edges[e].local = true;
        let edge = graph.edges[e].clone();
        if !is_condition_false(graph, &edge)? {
            any = true;
        }
    }
    Ok(any)
}

/// Check the conditional schedule constraint: a violated conditional
/// validity edge is only acceptable when all adjacent condition edges are
/// local. Adjacent conditions discovered here are forced local for the
/// recomputation.
fn has_violated_conditional_constraint(graph: &mut Graph) -> PstResult<bool> {
    let mut any = false;
    let mut sources: Vec<TaggedSet> = Vec::new();
    let mut sinks: Vec<TaggedSet> = Vec::new();
    for e in 0..graph.edges.len() {
        if !graph.edges[e].conditional_validity {
            continue;
        }
        if !is_violated(graph, e)? {
            continue;
        }
        any = true;
        let tagged_validity = graph.edges[e].tagged_validity.clone();
        for tagged in &tagged_validity {
            for part in &tagged.parts {
                sources.push((tagged.space.input.clone(), part.domain()?));
                sinks.push((tagged.space.output.clone(), part.range()?));
            }
        }
    }
    if !any {
        return Ok(false);
    }
    has_adjacent_true_conditions(graph, &sources, &sinks)
}

/// Read the per-node schedules and band structure out of the graph.
fn extract_result(graph: &Graph) -> Schedule {
    let mut nodes = Vec::with_capacity(graph.n());
    for node in &graph.nodes {
        let mut band_end = Vec::new();
        if graph.n_band > 0 {
            let mut b = 0i32;
            let mut r = 0;
            while r < graph.n_total_row {
                if node.band[r] == b {
                    r += 1;
                    continue;
                }
                band_end.push(r);
                b += 1;
                if node.band[r] == -1 {
                    break;
                }
                r += 1;
            }
            if r == graph.n_total_row {
                band_end.push(r);
            }
        }
        let n_band = band_end.len();
        nodes.push(ScheduleNodeResult {
            space: node.space.clone(),
            nparam: node.nparam,
            sched: node.sched.clone(),
            band_end,
            band_id: node.band_id[..n_band.min(node.band_id.len())].to_vec(),
            coincident: node.coincident[..graph.n_total_row.min(node.coincident.len())].to_vec(),
        });
    }
    Schedule {
        nodes,
        n_total_row: graph.n_total_row,
        n_band: graph.n_band,
        forest: OnceCell::new(),
    }
}
