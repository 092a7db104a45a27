//! Construction of the scheduling (I)LP problems.
//!
//! The coefficient constraints come from the dual of each dependence
//! relation: by the affine form of Farkas' lemma, `c0 + c·z >= 0` holds on
//! a non-empty polyhedron exactly when `c` is a non-negative combination
//! of its constraint rows. The dual is kept in that multiplier form; each
//! instantiation allocates fresh rational multiplier columns at the tail
//! of the LP, so the cone is represented exactly while the integer search
//! only ranges over the schedule coefficient columns.
//!
//! Self-dependences are dualized over differences: the relation is lifted
//! to `(params, x, delta)` with `y = x + delta` substituted and the `x`
//! coefficients pinned to zero, which is the dual of the delta set without
//! an explicit projection.
//!
//! The main LP fixes the global column order: the sum of the distance
//! bound parameter parts, the constant bound `m0`, the sum of all
//! parameter parts, the sum of all variable parts, the `m_n` pairs, and
//! then one block per node (constant, parameter pairs, variable pairs in
//! the cmap basis). Negative parts precede positive parts throughout.
//! The lexicographic minimum therefore prefers schedules with small
//! parametric distance bounds first, then a small constant bound, then
//! small coefficients.

use hashbrown::HashMap;

use pst_core::error::{PstError, PstResult};
use pst_core::ilp::{LpProblem, Region};
use pst_core::map::{BasicMap, Map};
use pst_core::mat::Mat;
use pst_core::Context;

use super::graph::Graph;

/// Index of the `m0` column in the main LP.
const M0_COL: usize = 1;
/// First `m_n` pair column in the main LP.
const PARAM_POS: usize = 4;

/// One dependence polyhedron's dual, in multiplier form. `c` columns are
/// `[c0 | c_n | c_x (| c_y)]`; multiplier columns are per-instantiation.
#[derive(Debug, Clone)]
pub struct DualBlock {
    n_c: usize,
    eqs: Vec<DualRow>,
    ineqs: Vec<DualRow>,
    n_mult: usize,
}

#[derive(Debug, Clone)]
struct DualRow {
    c: Vec<i64>,
    mult: Vec<i64>,
}

/// Where each lifted dimension of the dependence polyhedron goes.
#[derive(Clone, Copy)]
enum DimRole {
    /// Becomes coefficient column `c[i]` of the dual.
    CCol(usize),
    /// The valid inequalities may not involve this dimension.
    Pinned,
}

/// Dual of a single dependence basic map. With `intra` set, source and
/// destination dimensions are folded into differences.
fn build_dual(bmap: &BasicMap, intra: bool) -> PstResult<DualBlock> {
    let nparam = bmap.space.nparam;
    let n_in = bmap.space.n_in();
    let n_out = bmap.space.n_out();
    let n_div = bmap.divs.len();

    if intra && n_in != n_out {
        return Err(PstError::internal("self dependence with mismatched arity"));
    }

    // Lifted dimensions and their roles.
    let (n_lifted, roles, n_c): (usize, Vec<DimRole>, usize) = if intra {
        let n_c = 1 + nparam + n_in;
        let mut roles = Vec::new();
        for p in 0..nparam {
            roles.push(DimRole::CCol(1 + p));
        }
        for _ in 0..n_in {
            roles.push(DimRole::Pinned);
        }
        for i in 0..n_in {
            roles.push(DimRole::CCol(1 + nparam + i));
        }
        for _ in 0..n_div {
            roles.push(DimRole::Pinned);
        }
        (nparam + 2 * n_in + n_div, roles, n_c)
    } else {
        let n_c = 1 + nparam + n_in + n_out;
        let mut roles = Vec::new();
        for d in 0..nparam + n_in + n_out {
            roles.push(DimRole::CCol(1 + d));
        }
        for _ in 0..n_div {
            roles.push(DimRole::Pinned);
        }
        (nparam + n_in + n_out + n_div, roles, n_c)
    };

    // Constraint rows over the lifted dimensions. Rows touching unknown
    // divs are dropped; that widens the relation and so shrinks the dual,
    // which stays sound.
    let unknown_div_cols: Vec<usize> = bmap
        .divs
        .iter()
        .enumerate()
        .filter(|(_, d)| d.denom == 0)
        .map(|(i, _)| bmap.div_col(i))
        .collect();
    let touches_unknown = |row: &[i64]| unknown_div_cols.iter().any(|&c| row[c] != 0);

    let lift = |row: &[i64]| -> Vec<i64> {
        // Input row: [c0 | params | in | out | divs].
        let mut out = vec![0i64; 1 + n_lifted];
        out[0] = row[0];
        if intra {
            for p in 0..nparam {
                out[1 + p] = row[1 + p];
            }
            for i in 0..n_in {
                out[1 + nparam + i] = row[1 + nparam + i] + row[1 + nparam + n_in + i];
                out[1 + nparam + n_in + i] = row[1 + nparam + n_in + i];
            }
            for d in 0..n_div {
                out[1 + nparam + 2 * n_in + d] = row[1 + nparam + n_in + n_out + d];
            }
        } else {
            out[1..].copy_from_slice(&row[1..]);
        }
        out
    };

    let mut lifted_ineqs: Vec<Vec<i64>> = Vec::new();
    let mut lifted_eqs: Vec<Vec<i64>> = Vec::new();
    for row in bmap.ineqs.iter().chain(bmap.div_bound_rows().iter()) {
        if touches_unknown(row) {
            continue;
        }
        lifted_ineqs.push(lift(row));
    }
    for row in &bmap.eqs {
        if touches_unknown(row) {
            continue;
        }
        lifted_eqs.push(lift(row));
    }

    let n_ineq = lifted_ineqs.len();
    let n_eq = lifted_eqs.len();
    let n_mult = n_ineq + 2 * n_eq;

    let mult_coeffs = |d: usize| -> Vec<i64> {
        let mut m = vec![0i64; n_mult];
        for (j, row) in lifted_ineqs.iter().enumerate() {
            m[j] = row[1 + d];
        }
        for (k, row) in lifted_eqs.iter().enumerate() {
            m[n_ineq + 2 * k] = row[1 + d];
            m[n_ineq + 2 * k + 1] = -row[1 + d];
        }
        m
    };

    let mut eqs = Vec::with_capacity(n_lifted);
    for (d, role) in roles.iter().enumerate() {
        let mut c = vec![0i64; n_c];
        if let DimRole::CCol(col) = role {
            c[*col] = -1;
        }
        eqs.push(DualRow {
            c,
            mult: mult_coeffs(d),
        });
    }

    // The constant: c0 at least the combined constant terms.
    let mut c0 = vec![0i64; n_c];
    c0[0] = 1;
    let mut mult = vec![0i64; n_mult];
    for (j, row) in lifted_ineqs.iter().enumerate() {
        mult[j] = -row[0];
    }
    for (k, row) in lifted_eqs.iter().enumerate() {
        mult[n_ineq + 2 * k] = -row[0];
        mult[n_ineq + 2 * k + 1] = row[0];
    }
    let ineqs = vec![DualRow { c: c0, mult }];

    Ok(DualBlock {
        n_c,
        eqs,
        ineqs,
        n_mult,
    })
}

impl DualBlock {
    /// Rewrite a range of `c` columns through a change of basis, so that
    /// the block constrains basis coordinates `t` with `c = cmap * t`.
    fn transform(&mut self, offset: usize, cmap: &Mat) -> PstResult<()> {
        let n = cmap.n_col();
        for row in self.eqs.iter_mut().chain(self.ineqs.iter_mut()) {
            let beta = row.c[offset..offset + n].to_vec();
            let new = cmap.vec_product(&beta)?;
            row.c[offset..offset + n].copy_from_slice(&new);
        }
        Ok(())
    }
}

/// Cache of dependence duals, keyed on the relation itself. The cached
/// blocks are in the original coefficient basis; basis transforms are
/// applied to copies at instantiation time.
#[derive(Debug, Clone, Default)]
pub struct DualCache {
    intra: HashMap<Map, Vec<DualBlock>>,
    inter: HashMap<Map, Vec<DualBlock>>,
}

impl DualCache {
    fn duals(&mut self, map: &Map, intra: bool) -> PstResult<Vec<DualBlock>> {
        let table = if intra { &mut self.intra } else { &mut self.inter };
        if let Some(blocks) = table.get(map) {
            return Ok(blocks.clone());
        }
        let mut blocks = Vec::with_capacity(map.parts.len());
        for part in &map.parts {
            blocks.push(build_dual(part, intra)?);
        }
        table.insert(map.clone(), blocks.clone());
        Ok(blocks)
    }
}

type DimMap = Vec<Vec<(usize, i64)>>;

/// Columns `(neg, pos)` holding a signed value `sign * (pos - neg)`.
fn pair(neg_col: usize, sign: i64) -> Vec<(usize, i64)> {
    vec![(neg_col, -sign), (neg_col + 1, sign)]
}

/// Instantiate a dual block into the LP under a coefficient mapping,
/// allocating fresh multiplier columns.
fn apply_block(lp: &mut LpProblem, block: &DualBlock, dmap: &DimMap) -> PstResult<()> {
    debug_assert_eq!(dmap.len(), block.n_c);
    let mult_start = lp.add_rat_cols(block.n_mult);
    let width = mult_start + block.n_mult;

    let build = |row: &DualRow| -> PstResult<Vec<i64>> {
        let mut out = vec![0i64; 1 + width];
        for (ci, &v) in row.c.iter().enumerate() {
            if v == 0 {
                continue;
            }
            for &(col, s) in &dmap[ci] {
                let t = s
                    .checked_mul(v)
                    .and_then(|t| out[1 + col].checked_add(t))
                    .ok_or_else(|| PstError::arithmetic("lp coefficient overflow"))?;
                out[1 + col] = t;
            }
        }
        for (mi, &v) in row.mult.iter().enumerate() {
            out[1 + mult_start + mi] = v;
        }
        Ok(out)
    };

    for row in &block.eqs {
        let r = build(row)?;
        lp.add_eq(r);
    }
    for row in &block.ineqs {
        let r = build(row)?;
        lp.add_ineq(r);
    }
    Ok(())
}

struct NodeCols {
    start: usize,
    nparam: usize,
    nvar: usize,
}

impl NodeCols {
    fn of(graph: &Graph, idx: usize) -> NodeCols {
        let n = &graph.nodes[idx];
        NodeCols {
            start: n.start,
            nparam: n.nparam,
            nvar: n.nvar,
        }
    }

    fn param_pair(&self, p: usize) -> usize {
        self.start + 1 + 2 * p
    }

    fn var_pair(&self, i: usize) -> usize {
        self.start + 1 + 2 * self.nparam + 2 * i
    }
}

/// Distance expressed over the dual's coefficient columns for an edge
/// between two distinct nodes: `(c_dst_0 + c_dst_n n + c_dst_x y) -
/// (c_src_0 + c_src_n n + c_src_x x)`, scaled by `s`, with an optional
/// constant `extra` column (the bound `m`, or a carry slack).
#[allow(clippy::too_many_arguments)]
fn inter_dmap(
    nparam: usize,
    src: &NodeCols,
    dst: &NodeCols,
    s: i64,
    with_bound: bool,
    slack: Option<usize>,
) -> DimMap {
    let n_c = 1 + nparam + src.nvar + dst.nvar;
    let mut m: DimMap = vec![Vec::new(); n_c];

    if with_bound {
        m[0].push((M0_COL, 1));
    }
    if let Some(e) = slack {
        m[0].push((e, -1));
    }
    m[0].push((dst.start, s));
    m[0].push((src.start, -s));

    for p in 0..nparam {
        if with_bound {
            m[1 + p].extend(pair(PARAM_POS + 2 * p, 1));
        }
        if src.nparam > 0 {
            m[1 + p].extend(pair(dst.param_pair(p), s));
            m[1 + p].extend(pair(src.param_pair(p), -s));
        }
    }
    for i in 0..src.nvar {
        m[1 + nparam + i].extend(pair(src.var_pair(i), -s));
    }
    for i in 0..dst.nvar {
        m[1 + nparam + src.nvar + i].extend(pair(dst.var_pair(i), s));
    }
    m
}

/// Distance over a self dependence: `c_x * delta`, scaled by `s`.
fn intra_dmap(
    nparam: usize,
    node: &NodeCols,
    s: i64,
    with_bound: bool,
    slack: Option<usize>,
) -> DimMap {
    let n_c = 1 + nparam + node.nvar;
    let mut m: DimMap = vec![Vec::new(); n_c];
    if with_bound {
        m[0].push((M0_COL, 1));
    }
    if let Some(e) = slack {
        m[0].push((e, -1));
    }
    for p in 0..nparam {
        if with_bound {
            m[1 + p].extend(pair(PARAM_POS + 2 * p, 1));
        }
    }
    for i in 0..node.nvar {
        m[1 + nparam + i].extend(pair(node.var_pair(i), s));
    }
    m
}

/// The duals of an edge's relation, with the schedule basis applied to
/// the variable coefficient columns when `use_cmap` is set.
fn edge_duals(graph: &mut Graph, edge_idx: usize, use_cmap: bool) -> PstResult<Vec<DualBlock>> {
    let intra = graph.edges[edge_idx].src == graph.edges[edge_idx].dst;
    let map = graph.edges[edge_idx].map.clone();
    let mut blocks = graph.dual_cache.duals(&map, intra)?;
    if use_cmap {
        let nparam = map.space.nparam;
        let src = graph.edges[edge_idx].src;
        let dst = graph.edges[edge_idx].dst;
        for block in blocks.iter_mut() {
            if intra {
                block.transform(1 + nparam, &graph.nodes[src].cmap)?;
            } else {
                let n_in = graph.nodes[src].nvar;
                block.transform(1 + nparam, &graph.nodes[src].cmap)?;
                block.transform(1 + nparam + n_in, &graph.nodes[dst].cmap)?;
            }
        }
    }
    Ok(blocks)
}

fn add_coefficient_caps(ctx: &Context, graph: &Graph, lp: &mut LpProblem, total: usize) {
    if let Some(cap) = ctx.options.schedule_max_coefficient {
        for node in &graph.nodes {
            for j in 0..2 * (node.nparam + node.nvar) {
                let mut row = vec![0i64; 1 + total];
                row[0] = cap;
                row[1 + node.start + 1 + j] = -1;
                lp.add_ineq(row);
            }
        }
    }
}

/// Build the main LP for one new schedule row (spec'd column order above).
/// Coincidence edges are treated as local when `use_coincidence` is set
/// and are ignored otherwise.
pub fn setup_lp(ctx: &Context, graph: &mut Graph, use_coincidence: bool) -> PstResult<LpProblem> {
    let nparam = graph.nodes[0].space.nparam;
    let mut total = PARAM_POS + 2 * nparam;
    let sorted = graph.sorted.clone();
    for &si in &sorted {
        graph.nodes[si].update_cmap()?;
        graph.nodes[si].start = total;
        total += 1 + 2 * (graph.nodes[si].nparam + graph.nodes[si].nvar);
    }

    let mut lp = LpProblem::new(total);

    // Tie the three running sums to their columns.
    let mut row = vec![0i64; 1 + total];
    row[1] = -1;
    for i in 0..2 * nparam {
        row[1 + PARAM_POS + i] = 1;
    }
    lp.add_eq(row);

    if ctx.options.schedule_parametric {
        let mut row = vec![0i64; 1 + total];
        row[1 + 2] = -1;
        for node in &graph.nodes {
            for j in 0..2 * node.nparam {
                row[1 + node.start + 1 + j] = 1;
            }
        }
        lp.add_eq(row);
    }

    let mut row = vec![0i64; 1 + total];
    row[1 + 3] = -1;
    for node in &graph.nodes {
        for j in 0..2 * node.nvar {
            row[1 + node.start + 1 + 2 * node.nparam + j] = 1;
        }
    }
    lp.add_eq(row);

    if let Some(cap) = ctx.options.schedule_max_constant_term {
        for node in &graph.nodes {
            let mut row = vec![0i64; 1 + total];
            row[0] = cap;
            row[1 + node.start] = -1;
            lp.add_ineq(row);
        }
    }
    add_coefficient_caps(ctx, graph, &mut lp, total);

    // Validity constraints: distance at least zero. Local edges (and
    // coincidence edges when requested) get the lower bound here and the
    // upper bound from the proximity pass.
    for pass in 0..2 {
        for e in 0..graph.edges.len() {
            let edge = &graph.edges[e];
            let local = edge.local || (edge.coincidence && use_coincidence);
            if !edge.validity && !local {
                continue;
            }
            let is_intra = edge.src == edge.dst;
            if (pass == 0) != is_intra {
                continue;
            }
            let (src, dst) = (edge.src, edge.dst);
            let blocks = edge_duals(graph, e, true)?;
            let eq_start = lp.n_eq();
            let ineq_start = lp.n_ineq();
            for block in &blocks {
                let dmap = if is_intra {
                    intra_dmap(nparam, &NodeCols::of(graph, src), 1, false, None)
                } else {
                    inter_dmap(
                        nparam,
                        &NodeCols::of(graph, src),
                        &NodeCols::of(graph, dst),
                        1,
                        false,
                        None,
                    )
                };
                apply_block(&mut lp, block, &dmap)?;
            }
            if !is_intra {
                graph.edges[e].lp_eq_range = (eq_start, lp.n_eq());
                graph.edges[e].lp_ineq_range = (ineq_start, lp.n_ineq());
            }
        }
    }

    // Proximity constraints: distance at most `m0 + m_n n`, from both
    // sides when the edge is not also a validity edge; local edges are
    // bounded by zero instead.
    for e in 0..graph.edges.len() {
        let edge = &graph.edges[e];
        let local = edge.local || (edge.coincidence && use_coincidence);
        if !edge.proximity && !local {
            continue;
        }
        let is_intra = edge.src == edge.dst;
        let (src, dst) = (edge.src, edge.dst);
        let validity = edge.validity;
        let blocks = edge_duals(graph, e, true)?;
        let mut passes = vec![(-1i64, !local)];
        if !validity && !local {
            passes.push((1, true));
        }
        for (s, with_bound) in passes {
            for block in &blocks {
                let dmap = if is_intra {
                    intra_dmap(nparam, &NodeCols::of(graph, src), s, with_bound, None)
                } else {
                    inter_dmap(
                        nparam,
                        &NodeCols::of(graph, src),
                        &NodeCols::of(graph, dst),
                        s,
                        with_bound,
                        None,
                    )
                };
                apply_block(&mut lp, block, &dmap)?;
            }
        }
    }

    Ok(lp)
}

/// Build the carry LP: a slack `0 <= e_i <= 1` per dependence basic map,
/// the distance of each bounded below by `e_i`, and the sum of `1 - e_i`
/// minimized first. A solution with some `e_i` positive fully carries
/// those dependences.
pub fn setup_carry_lp(ctx: &Context, graph: &mut Graph) -> PstResult<(LpProblem, usize)> {
    let n_edge: usize = graph.edges.iter().map(|e| e.map.parts.len()).sum();

    let mut total = 3 + n_edge;
    let sorted = graph.sorted.clone();
    for &si in &sorted {
        graph.nodes[si].start = total;
        total += 1 + 2 * (graph.nodes[si].nparam + graph.nodes[si].nvar);
    }

    let mut lp = LpProblem::new(total);
    let nparam = graph.nodes[0].space.nparam;

    let mut row = vec![0i64; 1 + total];
    row[0] = -(n_edge as i64);
    row[1] = 1;
    for i in 0..n_edge {
        row[1 + 3 + i] = 1;
    }
    lp.add_eq(row);

    let mut row = vec![0i64; 1 + total];
    row[1 + 1] = -1;
    for node in &graph.nodes {
        for j in 0..2 * node.nparam {
            row[1 + node.start + 1 + j] = 1;
        }
    }
    lp.add_eq(row);

    let mut row = vec![0i64; 1 + total];
    row[1 + 2] = -1;
    for node in &graph.nodes {
        for j in 0..2 * node.nvar {
            row[1 + node.start + 1 + 2 * node.nparam + j] = 1;
        }
    }
    lp.add_eq(row);

    for i in 0..n_edge {
        let mut row = vec![0i64; 1 + total];
        row[0] = 1;
        row[1 + 3 + i] = -1;
        lp.add_ineq(row);
    }

    add_coefficient_caps(ctx, graph, &mut lp, total);

    let mut pos = 0;
    for e in 0..graph.edges.len() {
        let edge = &graph.edges[e];
        if !edge.validity && !edge.conditional_validity {
            continue;
        }
        let is_intra = edge.src == edge.dst;
        let (src, dst) = (edge.src, edge.dst);
        let parts = edge.map.parts.clone();
        for part in parts {
            let single = Map::from_basic_map(part);
            let blocks = graph.dual_cache.duals(&single, is_intra)?;
            for block in &blocks {
                let dmap = if is_intra {
                    intra_dmap(nparam, &NodeCols::of(graph, src), 1, false, Some(3 + pos))
                } else {
                    inter_dmap(
                        nparam,
                        &NodeCols::of(graph, src),
                        &NodeCols::of(graph, dst),
                        1,
                        false,
                        Some(3 + pos),
                    )
                };
                apply_block(&mut lp, block, &dmap)?;
            }
            pos += 1;
        }
    }

    Ok((lp, n_edge))
}

/// Solve the main LP with the per-node non-triviality regions. On
/// infeasibility, look for a validity edge between two components whose
/// removal restores feasibility and remember that pair as a place to
/// split.
pub fn solve_lp(graph: &mut Graph, lp: &LpProblem) -> PstResult<Option<Vec<i64>>> {
    let mut regions = Vec::with_capacity(graph.n());
    for node in &graph.nodes {
        let pos = node.start + 1 + 2 * (node.nparam + node.rank);
        let len = if graph.needs_row(node) {
            2 * (node.nvar - node.rank)
        } else {
            0
        };
        regions.push(Region { pos, len });
    }
    let sol = lp.lexmin_nontrivial(&regions)?;
    if sol.is_none() {
        let mut found: Option<(i32, i32)> = None;
        for edge in &graph.edges {
            if !edge.validity || edge.src == edge.dst {
                continue;
            }
            let (s, d) = (graph.nodes[edge.src].scc, graph.nodes[edge.dst].scc);
            if s == d {
                continue;
            }
            if edge.lp_eq_range.0 == edge.lp_eq_range.1
                && edge.lp_ineq_range.0 == edge.lp_ineq_range.1
            {
                continue;
            }
            if lp.feasible_without(edge.lp_eq_range, edge.lp_ineq_range)? {
                found = Some((s as i32, d as i32));
                break;
            }
        }
        if let Some((s, d)) = found {
            graph.src_scc = s;
            graph.dst_scc = d;
        }
    }
    Ok(sol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pst_core::space::{Space, Tuple};

    #[test]
    fn test_build_dual_of_point_difference() {
        // R = { [i] -> [i + 1] }: the delta dual demands c0 + c >= 0 for
        // the direction delta = 1.
        let space = Space::map(0, Tuple::named("S", 1), Tuple::named("S", 1));
        let mut bmap = BasicMap::universe(space);
        bmap.add_eq(vec![1, 1, -1]); // 1 + i - y = 0, so y = i + 1
        let block = build_dual(&bmap, true).unwrap();
        assert_eq!(block.n_c, 2);
        // One equality per lifted dimension (x pinned + delta), plus the
        // constant inequality.
        assert_eq!(block.eqs.len(), 2);
        assert_eq!(block.ineqs.len(), 1);
        // Multipliers: one pair for the single equality row.
        assert_eq!(block.n_mult, 2);
    }

    #[test]
    fn test_dual_cache_hits() {
        let space = Space::map(0, Tuple::named("A", 1), Tuple::named("B", 1));
        let mut bmap = BasicMap::universe(space.clone());
        bmap.add_eq(vec![0, 1, -1]);
        let map = Map::from_basic_map(bmap);
        let mut cache = DualCache::default();
        let a = cache.duals(&map, false).unwrap();
        let b = cache.duals(&map, false).unwrap();
        assert_eq!(a.len(), b.len());
        assert_eq!(cache.inter.len(), 1);
    }
}
