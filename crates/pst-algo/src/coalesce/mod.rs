//! Coalescing of basic map unions.
//!
//! For each pair of basic maps in a union, decide whether their union is
//! itself convex and, if so, replace the pair by the single fused basic
//! map. The decision is a case analysis over the position of each
//! constraint of one basic map relative to the other:
//!
//! | status | meaning |
//! |---|---|
//! | `Redundant` | redundant within its own basic map, ignored |
//! | `Valid` | satisfied by every point of the other basic map |
//! | `Separate` | violated by every point of the other basic map |
//! | `Cut` | satisfied by some points, violated by others |
//! | `AdjEq` | one unit outside an equality face of the other |
//! | `AdjIneq` | one unit outside an inequality face of the other |
//!
//! Any `Separate` aborts the pair. The remaining rules are tried in a
//! fixed order: subsumption, equality adjacent to equality (wrapping both
//! parallel hyperplanes), equality adjacent to inequality (relaxation or
//! facet wrapping), a single pair of adjacent inequalities (dropping the
//! opposing constraints or extension), cut facets contained in the other
//! basic map, and finally wrapping in relaxed cut facets.
//!
//! Basic maps and their tableaus pair one to one; a successful fusion
//! replaces both and restarts the scan, so the number of basic maps
//! strictly decreases and the fixed point terminates.

mod wrap;

use pst_core::error::{PstError, PstResult};
use pst_core::map::{BasicMap, Map};
use pst_core::seq;
use pst_core::tab::{IneqType, Tab};
use pst_core::Context;

use self::wrap::Wraps;

/// Position of one constraint relative to the other basic map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Redundant,
    Valid,
    Separate,
    Cut,
    AdjEq,
    AdjIneq,
}

fn any(st: &[Status], s: Status) -> bool {
    st.iter().any(|&v| v == s)
}

fn count(st: &[Status], s: Status) -> usize {
    st.iter().filter(|&&v| v == s).count()
}

/// All entries valid, ignoring constraints redundant in their own map.
fn all_valid(st: &[Status]) -> bool {
    st.iter().all(|&v| v == Status::Valid || v == Status::Redundant)
}

struct Coalescer<'a> {
    ctx: &'a Context,
    bmaps: Vec<BasicMap>,
    tabs: Vec<Tab>,
}

impl<'a> Coalescer<'a> {
    fn status_in(&self, row: &[i64], tab_idx: usize) -> PstResult<Status> {
        Ok(match self.tabs[tab_idx].ineq_type(row)? {
            IneqType::Redundant => Status::Valid,
            IneqType::Cut => Status::Cut,
            IneqType::Separate => Status::Separate,
            IneqType::AdjEq => Status::AdjEq,
            IneqType::AdjIneq => Status::AdjIneq,
        })
    }

    /// Status of the equalities of basic map `i` against the tableau of
    /// `j`, two entries per equality: first the negated side, then the
    /// equality itself.
    fn eq_status_in(&self, i: usize, j: usize) -> PstResult<Vec<Status>> {
        let mut out = Vec::with_capacity(2 * self.bmaps[i].eqs.len());
        for row in &self.bmaps[i].eqs {
            let negated: Vec<i64> = row.iter().map(|&v| -v).collect();
            out.push(self.status_in(&negated, j)?);
            out.push(self.status_in(row, j)?);
        }
        Ok(out)
    }

    /// Status of the inequalities of basic map `i` against the tableau of
    /// `j`. Constraints redundant in their own tableau are marked
    /// `Redundant` and skipped by the rules.
    fn ineq_status_in(&self, i: usize, own_tab: bool, j: usize) -> PstResult<Vec<Status>> {
        let n_eq = self.bmaps[i].eqs.len();
        let mut out = Vec::with_capacity(self.bmaps[i].ineqs.len());
        for (k, row) in self.bmaps[i].ineqs.iter().enumerate() {
            if own_tab && self.tabs[i].is_redundant(n_eq + k) {
                out.push(Status::Redundant);
                continue;
            }
            out.push(self.status_in(row, j)?);
        }
        Ok(out)
    }

    /// Remove basic map `i`, moving the last entry into its slot.
    fn drop_part(&mut self, i: usize) {
        self.bmaps.swap_remove(i);
        self.tabs.swap_remove(i);
    }

    fn exchange(&mut self, i: usize, j: usize) {
        self.bmaps.swap(i, j);
        self.tabs.swap(i, j);
    }

    /// Replace the pair by the basic map bounded by the constraints valid
    /// in both, plus any extra (wrapping) rows. The fused basic map takes
    /// the smaller position.
    #[allow(clippy::too_many_arguments)]
    fn fuse(
        &mut self,
        i: usize,
        j: usize,
        eq_i: Option<&[Status]>,
        ineq_i: &[Status],
        eq_j: Option<&[Status]>,
        ineq_j: &[Status],
        extra: &[Vec<i64>],
        detect_equalities: bool,
    ) -> PstResult<bool> {
        if j < i {
            return self.fuse(j, i, eq_j, ineq_j, eq_i, ineq_i, extra, detect_equalities);
        }
        let mut fused = BasicMap::universe(self.bmaps[i].space.clone());
        fused.divs = self.bmaps[i].divs.clone();

        let keep_eq = |st: Option<&[Status]>, k: usize| match st {
            None => true,
            Some(st) => st[2 * k] == Status::Valid && st[2 * k + 1] == Status::Valid,
        };
        for (k, row) in self.bmaps[i].eqs.iter().enumerate() {
            if keep_eq(eq_i, k) {
                fused.eqs.push(row.clone());
            }
        }
        for (k, row) in self.bmaps[j].eqs.iter().enumerate() {
            if keep_eq(eq_j, k) {
                fused.eqs.push(row.clone());
            }
        }
        for (k, row) in self.bmaps[i].ineqs.iter().enumerate() {
            if ineq_i[k] == Status::Valid {
                fused.ineqs.push(row.clone());
            }
        }
        for (k, row) in self.bmaps[j].ineqs.iter().enumerate() {
            if ineq_j[k] == Status::Valid {
                fused.ineqs.push(row.clone());
            }
        }
        for row in extra {
            fused.ineqs.push(row.clone());
        }

        if detect_equalities {
            fused.detect_inequality_pairs();
        }
        fused.gauss()?;
        fused.flags.is_final = true;
        fused.flags.rational =
            self.bmaps[i].flags.rational && self.bmaps[j].flags.rational;

        let mut fused_tab = Tab::from_basic_map(&fused)?;
        fused_tab.detect_redundant()?;

        self.bmaps[i] = fused;
        self.tabs[i] = fused_tab;
        self.drop_part(j);
        Ok(true)
    }

    /// All constraints of both basic maps are valid or cut. If every cut
    /// facet of `i` lies inside `j`, the valid constraints alone describe
    /// the union. The facet checks run on a rational tableau so that a
    /// constraint cutting only rational points cannot be misread as valid.
    fn check_facets(&mut self, i: usize, j: usize, ineq_i: &[Status], ineq_j: &[Status]) -> PstResult<bool> {
        let n_eq = self.bmaps[i].eqs.len();
        let snap = self.tabs[i].snap();
        self.tabs[i].mark_rational();
        let snap2 = self.tabs[i].snap();

        for k in 0..self.bmaps[i].ineqs.len() {
            if ineq_i[k] != Status::Cut {
                continue;
            }
            self.tabs[i].select_facet(n_eq + k)?;
            for l in 0..self.bmaps[j].ineqs.len() {
                if ineq_j[l] != Status::Cut {
                    continue;
                }
                let row = self.bmaps[j].ineqs[l].clone();
                if self.status_in(&row, i)? != Status::Valid {
                    self.tabs[i].rollback(&snap);
                    return Ok(false);
                }
            }
            self.tabs[i].rollback(&snap2);
        }

        self.fuse(i, j, None, ineq_i, None, ineq_j, &[], false)
    }

    /// Does basic map `i` contain the polyhedron currently described by
    /// the tableau at `tab_idx`?
    fn contains(&self, i: usize, ineq_i: &[Status], tab_idx: usize) -> PstResult<bool> {
        for row in &self.bmaps[i].eqs {
            let negated: Vec<i64> = row.iter().map(|&v| -v).collect();
            if self.status_in(&negated, tab_idx)? != Status::Valid {
                return Ok(false);
            }
            let row = row.clone();
            if self.status_in(&row, tab_idx)? != Status::Valid {
                return Ok(false);
            }
        }
        for (k, row) in self.bmaps[i].ineqs.iter().enumerate() {
            if ineq_i[k] == Status::Redundant {
                continue;
            }
            let row = row.clone();
            if self.status_in(&row, tab_idx)? != Status::Valid {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Basic map `i` has one inequality adjacent to an inequality of `j`
    /// and the rest valid; `j` has cut constraints. Replace the adjacent
    /// inequality by its strict opposite, add the valid inequalities of
    /// `j`, and check the result is contained in `j`; the union is then
    /// exactly the valid constraints of both.
    #[allow(clippy::too_many_arguments)]
    fn is_adj_ineq_extension(
        &mut self,
        i: usize,
        j: usize,
        eq_i: &[Status],
        ineq_i: &[Status],
        eq_j: &[Status],
        ineq_j: &[Status],
    ) -> PstResult<bool> {
        let n_eq = self.bmaps[i].eqs.len();
        let Some(k) = ineq_i.iter().position(|&s| s == Status::AdjIneq) else {
            return Err(PstError::internal(
                "expected exactly one adjacent inequality",
            ));
        };

        let snap = self.tabs[i].snap();
        self.tabs[i].unrestrict(n_eq + k);

        let mut opposite: Vec<i64> = self.bmaps[i].ineqs[k].iter().map(|&v| -v).collect();
        opposite[0] -= 1;
        self.tabs[i].add_ineq(&opposite)?;

        for (l, row) in self.bmaps[j].ineqs.clone().iter().enumerate() {
            if ineq_j[l] != Status::Valid {
                continue;
            }
            self.tabs[i].add_ineq(row)?;
        }

        if self.contains(j, ineq_j, i)? {
            return self.fuse(i, j, Some(eq_i), ineq_i, Some(eq_j), ineq_j, &[], false);
        }

        self.tabs[i].rollback(&snap);
        Ok(false)
    }

    /// Both basic maps have an inequality adjacent to an opposite
    /// inequality of the other. With no cuts and a single pair, dropping
    /// the two opposing constraints fuses the pair; with cuts on one side
    /// only, try the extension test.
    #[allow(clippy::too_many_arguments)]
    fn check_adj_ineq(
        &mut self,
        i: usize,
        j: usize,
        eq_i: &[Status],
        ineq_i: &[Status],
        eq_j: &[Status],
        ineq_j: &[Status],
    ) -> PstResult<bool> {
        let count_i = count(ineq_i, Status::AdjIneq);
        let count_j = count(ineq_j, Status::AdjIneq);

        if count_i != 1 && count_j != 1 {
            return Ok(false);
        }

        let cut_i = any(eq_i, Status::Cut) || any(ineq_i, Status::Cut);
        let cut_j = any(eq_j, Status::Cut) || any(ineq_j, Status::Cut);

        if !cut_i && !cut_j && count_i == 1 && count_j == 1 {
            return self.fuse(i, j, None, ineq_i, None, ineq_j, &[], false);
        }

        if count_i == 1 && !cut_i {
            return self.is_adj_ineq_extension(i, j, eq_i, ineq_i, eq_j, ineq_j);
        }
        if count_j == 1 && !cut_j {
            return self.is_adj_ineq_extension(j, i, eq_j, ineq_j, eq_i, ineq_i);
        }

        Ok(false)
    }

    /// Inequality `k` of `i` is adjacent to an equality of `j`. Relax it
    /// by one; if the new facet lies inside `j`, the relaxed basic map is
    /// exactly the union and replaces the pair.
    fn is_adj_eq_extension(
        &mut self,
        i: usize,
        j: usize,
        k: usize,
        ineq_j: &[Status],
    ) -> PstResult<bool> {
        let n_eq = self.bmaps[i].eqs.len();
        if self.tabs[i].is_equality(n_eq + k) {
            return Ok(false);
        }

        let snap = self.tabs[i].snap();
        self.tabs[i].relax(n_eq + k);
        let snap2 = self.tabs[i].snap();
        self.tabs[i].select_facet(n_eq + k)?;

        if self.contains(j, ineq_j, i)? {
            self.tabs[i].rollback(&snap2);
            self.bmaps[i].ineqs[k][0] += 1;
            self.bmaps[i].flags.is_final = true;
            if j < i {
                self.exchange(i, j);
                self.drop_part(i);
            } else {
                self.drop_part(j);
            }
            return Ok(true);
        }

        self.tabs[i].rollback(&snap);
        Ok(false)
    }

    /// The non-redundant constraints of a basic map, as refined by its
    /// tableau. Relaxations applied through the tableau are reflected.
    fn updated_set(&self, i: usize) -> BasicMap {
        self.tabs[i].update_basic_map(&self.bmaps[i])
    }

    /// Inequality `k` of `i` is adjacent to basic map `j`: wrap the facet
    /// of `k` and the constraints of `j` around their ridges to cover the
    /// other side, and fuse with the wrapping constraints on success.
    #[allow(clippy::too_many_arguments)]
    fn can_wrap_in_facet(
        &mut self,
        i: usize,
        j: usize,
        k: usize,
        eq_i: &[Status],
        ineq_i: &[Status],
        eq_j: &[Status],
        ineq_j: &[Status],
    ) -> PstResult<bool> {
        let set_i = self.updated_set(i);
        let set_j = self.updated_set(j);
        let mut wraps = Wraps::new(
            self.ctx,
            &self.bmaps[i],
            eq_i,
            ineq_i,
            &self.bmaps[j],
            eq_j,
            ineq_j,
        );

        let mut bound = self.bmaps[i].ineqs[k].clone();
        bound[0] += 1;
        wraps.rows.push(bound.clone());

        wraps.add_wraps(&self.bmaps[j], &self.tabs[j], &bound, &[&set_i])?;
        if wraps.rows.is_empty() {
            return Ok(false);
        }

        let n_eq = self.bmaps[i].eqs.len();
        let snap = self.tabs[i].snap();
        self.tabs[i].select_facet(n_eq + k)?;
        self.tabs[i].detect_redundant()?;

        let neg_bound: Vec<i64> = self.bmaps[i].ineqs[k].iter().map(|&v| -v).collect();
        let n = wraps.rows.len();
        wraps.add_wraps(&self.bmaps[i], &self.tabs[i], &neg_bound, &[&set_j])?;

        self.tabs[i].rollback(&snap);
        if !wraps.rows.is_empty() {
            self.check_wraps(&mut wraps, n, i)?;
        }
        if wraps.rows.is_empty() {
            return Ok(false);
        }

        let rows = std::mem::take(&mut wraps.rows);
        self.fuse(i, j, Some(eq_i), ineq_i, Some(eq_j), ineq_j, &rows, false)
    }

    /// Wrapping constraints produced against a facet must also be valid
    /// for the source basic map; reject the whole set otherwise.
    fn check_wraps(&self, wraps: &mut Wraps, first: usize, i: usize) -> PstResult<()> {
        for row in &wraps.rows[first..] {
            if self.tabs[i].ineq_type(row)? != IneqType::Redundant {
                wraps.rows.clear();
                return Ok(());
            }
        }
        Ok(())
    }

    /// Basic map `j` sticks out of the cut constraints of `i` by at most
    /// one each. For every cut constraint, intersect `j` with the
    /// hyperplane one unit out and wrap the non-redundant constraints of
    /// that slice around the union.
    #[allow(clippy::too_many_arguments)]
    fn wrap_in_facets(
        &mut self,
        i: usize,
        j: usize,
        cuts: &[usize],
        eq_i: &[Status],
        ineq_i: &[Status],
        eq_j: &[Status],
        ineq_j: &[Status],
    ) -> PstResult<bool> {
        let set_i = self.updated_set(i);
        let set_j = self.updated_set(j);
        let mut wraps = Wraps::new(
            self.ctx,
            &self.bmaps[i],
            eq_i,
            ineq_i,
            &self.bmaps[j],
            eq_j,
            ineq_j,
        );

        let snap = self.tabs[j].snap();
        let mut completed = true;

        for &k in cuts {
            let mut bound = self.bmaps[i].ineqs[k].clone();
            bound[0] += 1;
            wraps.rows.push(bound.clone());

            self.tabs[j].add_eq(&bound)?;
            self.tabs[j].detect_redundant()?;

            if self.tabs[j].empty {
                // The relaxed hyperplane misses `j`, so the original cut
                // constraint was valid for the integer points after all.
                let last = wraps.rows.last_mut().expect("row just pushed");
                last[0] -= 1;
            } else {
                wraps.add_wraps(&self.bmaps[j], &self.tabs[j], &bound, &[&set_i, &set_j])?;
            }

            self.tabs[j].rollback(&snap);

            if wraps.rows.is_empty() {
                completed = false;
                break;
            }
        }

        if !completed {
            return Ok(false);
        }
        let rows = std::mem::take(&mut wraps.rows);
        self.fuse(i, j, Some(eq_i), ineq_i, Some(eq_j), ineq_j, &rows, false)
    }

    /// If relaxing every cut inequality of `i` by one makes it valid for
    /// `j`, wrap in the slices sticking out. Only integer basic maps: the
    /// argument relies on no integer point lying strictly between a facet
    /// and its relaxation.
    #[allow(clippy::too_many_arguments)]
    fn can_wrap_in_set(
        &mut self,
        i: usize,
        j: usize,
        eq_i: &[Status],
        ineq_i: &[Status],
        eq_j: &[Status],
        ineq_j: &[Status],
    ) -> PstResult<bool> {
        if self.bmaps[i].flags.rational || self.bmaps[j].flags.rational {
            return Ok(false);
        }
        let cuts: Vec<usize> = ineq_i
            .iter()
            .enumerate()
            .filter(|(_, &s)| s == Status::Cut)
            .map(|(k, _)| k)
            .collect();
        if cuts.is_empty() {
            return Ok(false);
        }
        for &k in &cuts {
            let mut row = self.bmaps[i].ineqs[k].clone();
            row[0] += 1;
            if self.tabs[j].ineq_type(&row)? != IneqType::Redundant {
                return Ok(false);
            }
        }
        self.wrap_in_facets(i, j, &cuts, eq_i, ineq_i, eq_j, ineq_j)
    }

    /// Try wrapping in whichever of the two basic maps has no cut
    /// equalities.
    #[allow(clippy::too_many_arguments)]
    fn check_wrap(
        &mut self,
        i: usize,
        j: usize,
        eq_i: &[Status],
        ineq_i: &[Status],
        eq_j: &[Status],
        ineq_j: &[Status],
    ) -> PstResult<bool> {
        if !any(eq_i, Status::Cut)
            && self.can_wrap_in_set(i, j, eq_i, ineq_i, eq_j, ineq_j)?
        {
            return Ok(true);
        }
        if !any(eq_j, Status::Cut) {
            return self.can_wrap_in_set(j, i, eq_j, ineq_j, eq_i, ineq_i);
        }
        Ok(false)
    }

    /// An equality of `j` is adjacent to an inequality of `i`. Require a
    /// single adjacent inequality on the `i` side and no cuts; then try
    /// relaxation, falling back to facet wrapping.
    #[allow(clippy::too_many_arguments)]
    fn check_adj_eq(
        &mut self,
        i: usize,
        j: usize,
        eq_i: &[Status],
        ineq_i: &[Status],
        eq_j: &[Status],
        ineq_j: &[Status],
    ) -> PstResult<bool> {
        if any(eq_i, Status::AdjIneq) && any(eq_j, Status::AdjIneq) {
            // Adjacent equalities on both sides: too intertwined.
            return Ok(false);
        }
        if any(eq_i, Status::AdjIneq) {
            return self.check_adj_eq(j, i, eq_j, ineq_j, eq_i, ineq_i);
        }

        // Now `j` has an equality adjacent to an inequality in `i`.
        if any(eq_i, Status::Cut) || any(ineq_i, Status::Cut) {
            return Ok(false);
        }
        if count(ineq_i, Status::AdjEq) != 1
            || any(ineq_j, Status::AdjEq)
            || any(ineq_i, Status::AdjIneq)
            || any(ineq_j, Status::AdjIneq)
        {
            return Ok(false);
        }

        let k = ineq_i
            .iter()
            .position(|&s| s == Status::AdjEq)
            .expect("counted above");

        if self.is_adj_eq_extension(i, j, k, ineq_j)? {
            return Ok(true);
        }

        if count(eq_j, Status::AdjIneq) != 1 {
            return Ok(false);
        }

        self.can_wrap_in_facet(i, j, k, eq_i, ineq_i, eq_j, ineq_j)
    }

    /// The two basic maps lie on adjacent parallel hyperplanes. Wrap the
    /// facets around both hyperplanes to cover the other side. When more
    /// than one equality pair is adjacent, the fused result satisfies
    /// derived equalities that arrive as inequality pairs, so equality
    /// detection runs on the fusion.
    #[allow(clippy::too_many_arguments)]
    fn check_eq_adj_eq(
        &mut self,
        i: usize,
        j: usize,
        eq_i: &[Status],
        ineq_i: &[Status],
        eq_j: &[Status],
        ineq_j: &[Status],
    ) -> PstResult<bool> {
        let detect_equalities = count(eq_i, Status::AdjEq) != 1;
        let k = eq_i
            .iter()
            .position(|&s| s == Status::AdjEq)
            .expect("caller saw an adjacent equality");

        let set_i = self.updated_set(i);
        let set_j = self.updated_set(j);
        let mut wraps = Wraps::new(
            self.ctx,
            &self.bmaps[i],
            eq_i,
            ineq_i,
            &self.bmaps[j],
            eq_j,
            ineq_j,
        );

        let mut bound: Vec<i64> = if k % 2 == 0 {
            self.bmaps[i].eqs[k / 2].iter().map(|&v| -v).collect()
        } else {
            self.bmaps[i].eqs[k / 2].clone()
        };
        bound[0] += 1;

        wraps.rows.push(bound.clone());
        wraps.add_wraps(&self.bmaps[j], &self.tabs[j], &bound, &[&set_i])?;
        if wraps.rows.is_empty() {
            return Ok(false);
        }

        bound[0] -= 1;
        seq::neg(&mut bound);
        wraps.rows.push(bound.clone());
        wraps.add_wraps(&self.bmaps[i], &self.tabs[i], &bound, &[&set_j])?;
        if wraps.rows.is_empty() {
            return Ok(false);
        }

        let rows = std::mem::take(&mut wraps.rows);
        self.fuse(
            i,
            j,
            Some(eq_i),
            ineq_i,
            Some(eq_j),
            ineq_j,
            &rows,
            detect_equalities,
        )
    }

    /// The complete case analysis for a pair living in the same local
    /// space. The first matching rule wins; any separate constraint means
    /// the union cannot be convex.
    fn coalesce_local_pair(&mut self, i: usize, j: usize) -> PstResult<bool> {
        let eq_i = self.eq_status_in(i, j)?;
        if any(&eq_i, Status::Separate) {
            return Ok(false);
        }
        let eq_j = self.eq_status_in(j, i)?;
        if any(&eq_j, Status::Separate) {
            return Ok(false);
        }
        let ineq_i = self.ineq_status_in(i, true, j)?;
        if any(&ineq_i, Status::Separate) {
            return Ok(false);
        }
        let ineq_j = self.ineq_status_in(j, true, i)?;
        if any(&ineq_j, Status::Separate) {
            return Ok(false);
        }

        if all_valid(&eq_i) && all_valid(&ineq_i) {
            self.drop_part(j);
            return Ok(true);
        }
        if all_valid(&eq_j) && all_valid(&ineq_j) {
            self.drop_part(i);
            return Ok(true);
        }
        if any(&eq_i, Status::AdjEq) {
            return self.check_eq_adj_eq(i, j, &eq_i, &ineq_i, &eq_j, &ineq_j);
        }
        if any(&eq_j, Status::AdjEq) {
            return self.check_eq_adj_eq(j, i, &eq_j, &ineq_j, &eq_i, &ineq_i);
        }
        if any(&eq_i, Status::AdjIneq) || any(&eq_j, Status::AdjIneq) {
            return self.check_adj_eq(i, j, &eq_i, &ineq_i, &eq_j, &ineq_j);
        }
        if any(&ineq_i, Status::AdjEq) || any(&ineq_j, Status::AdjEq) {
            // An inequality adjacent to an equality face without the
            // matching equality status is inconsistent.
            debug_assert!(false, "inequality adjacent to an undetected equality");
            return Ok(false);
        }
        if any(&ineq_i, Status::AdjIneq) || any(&ineq_j, Status::AdjIneq) {
            return self.check_adj_ineq(i, j, &eq_i, &ineq_i, &eq_j, &ineq_j);
        }

        let mut changed = false;
        if !any(&eq_i, Status::Cut) && !any(&eq_j, Status::Cut) {
            changed = self.check_facets(i, j, &ineq_i, &ineq_j)?;
        }
        if !changed {
            changed = self.check_wrap(i, j, &eq_i, &ineq_i, &eq_j, &ineq_j)?;
        }
        Ok(changed)
    }

    /// One-sided subsumption check for basic maps whose div list is a
    /// subset of the other's: expand the smaller list and test all its
    /// constraints for validity on the other basic map.
    fn coalesce_subset(
        &mut self,
        i: usize,
        j: usize,
        merged: &[pst_core::map::DivDef],
        exp: &[usize],
    ) -> PstResult<bool> {
        let bmap = self.bmaps[i].expand_divs(merged, exp);

        let mut eq_status = Vec::with_capacity(2 * bmap.eqs.len());
        for row in &bmap.eqs {
            let negated: Vec<i64> = row.iter().map(|&v| -v).collect();
            eq_status.push(self.status_in(&negated, j)?);
            eq_status.push(self.status_in(row, j)?);
        }
        if any(&eq_status, Status::Separate) {
            return Ok(false);
        }
        let mut ineq_status = Vec::with_capacity(bmap.ineqs.len());
        for row in &bmap.ineqs {
            ineq_status.push(self.status_in(row, j)?);
        }
        if any(&ineq_status, Status::Separate) {
            return Ok(false);
        }

        if all_valid(&eq_status) && all_valid(&ineq_status) {
            self.drop_part(j);
            return Ok(true);
        }
        Ok(false)
    }

    /// Pair check for basic maps with different div lists: only a subset
    /// relation between the div lists allows a (one-sided) test.
    fn check_coalesce_subset(&mut self, i: usize, j: usize) -> PstResult<bool> {
        if self.bmaps[i].divs.len() == self.bmaps[j].divs.len() {
            return Ok(false);
        }
        if self.bmaps[j].divs.len() < self.bmaps[i].divs.len() {
            return self.check_coalesce_subset(j, i);
        }
        if !self.bmaps[i].divs_known() {
            return Ok(false);
        }
        let Some((merged, exp_i, _exp_j)) = BasicMap::merge_divs(&self.bmaps[i], &self.bmaps[j])
        else {
            return Ok(false);
        };
        if merged.len() != self.bmaps[j].divs.len() {
            return Ok(false);
        }
        self.coalesce_subset(i, j, &merged, &exp_i)
    }

    fn coalesce_pair(&mut self, i: usize, j: usize) -> PstResult<bool> {
        if self.bmaps[i].same_divs(&self.bmaps[j])
            && (self.bmaps[i].divs.is_empty()
                || (self.bmaps[i].divs_known() && self.bmaps[j].divs_known()))
        {
            return self.coalesce_local_pair(i, j);
        }
        self.check_coalesce_subset(i, j)
    }

    /// Scan all unordered pairs; restart the inner loop after a merge
    /// because the basic map at `i` has changed.
    fn run(&mut self) -> PstResult<()> {
        let mut i = self.bmaps.len() as isize - 2;
        while i >= 0 {
            let mut j = (i + 1) as usize;
            while j < self.bmaps.len() {
                if self.coalesce_pair(i as usize, j)? {
                    j = (i + 1) as usize;
                } else {
                    j += 1;
                }
            }
            i -= 1;
        }
        Ok(())
    }
}

/// Replace pairs of basic maps whose union is convex by that union, until
/// no pair can be merged. The union of the result equals the union of the
/// input; the number of basic maps never increases.
pub fn map_coalesce(ctx: &Context, mut map: Map) -> PstResult<Map> {
    map.remove_empty_parts();
    if map.n() <= 1 {
        return Ok(map);
    }
    map.sort_divs();
    let space = map.space.clone();

    let mut bmaps = Vec::new();
    let mut tabs = Vec::new();
    for mut part in map.parts {
        let mut tab = Tab::from_basic_map(&part)?;
        if !part.flags.no_implicit && !tab.empty {
            tab.detect_implicit_equalities()?;
            part = tab.make_equalities_explicit(&part);
            tab = Tab::from_basic_map(&part)?;
        }
        if !part.flags.no_redundant && !tab.empty {
            tab.detect_redundant()?;
        }
        bmaps.push(part);
        tabs.push(tab);
    }
    let mut idx = bmaps.len();
    while idx > 0 {
        idx -= 1;
        if tabs[idx].empty {
            bmaps.swap_remove(idx);
            tabs.swap_remove(idx);
        }
    }

    let mut coalescer = Coalescer { ctx, bmaps, tabs };
    coalescer.run()?;

    let mut out = Map::empty(space);
    for (bmap, tab) in coalescer.bmaps.iter().zip(&coalescer.tabs) {
        let mut part = tab.update_basic_map(bmap);
        part.gauss()?;
        part.flags.is_final = true;
        part.flags.no_implicit = true;
        part.flags.no_redundant = true;
        out.add_part(part);
    }
    Ok(out)
}

/// Coalesce a set; sets are maps with an empty input tuple.
pub fn set_coalesce(ctx: &Context, set: Map) -> PstResult<Map> {
    map_coalesce(ctx, set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pst_core::space::{Space, Tuple};

    fn interval_set(parts: &[(i64, i64)]) -> Map {
        let space = Space::set(0, Tuple::named("S", 1));
        let mut map = Map::empty(space.clone());
        for &(lo, hi) in parts {
            map.add_part(BasicMap::from_constraints(
                space.clone(),
                vec![],
                vec![vec![-lo, 1], vec![hi, -1]],
            ));
        }
        map
    }

    #[test]
    fn test_adjacent_intervals_merge() {
        let ctx = Context::new();
        let out = map_coalesce(&ctx, interval_set(&[(0, 5), (6, 10)])).unwrap();
        assert_eq!(out.n(), 1);
        let part = &out.parts[0];
        assert_eq!(part.ineqs.len(), 2);
    }

    #[test]
    fn test_separate_intervals_stay() {
        let ctx = Context::new();
        let out = map_coalesce(&ctx, interval_set(&[(0, 5), (7, 10)])).unwrap();
        assert_eq!(out.n(), 2);
    }

    #[test]
    fn test_subset_dropped() {
        let ctx = Context::new();
        let out = map_coalesce(&ctx, interval_set(&[(0, 10), (2, 7)])).unwrap();
        assert_eq!(out.n(), 1);
    }

    #[test]
    fn test_overlap_merges() {
        let ctx = Context::new();
        let out = map_coalesce(&ctx, interval_set(&[(0, 6), (4, 10)])).unwrap();
        assert_eq!(out.n(), 1);
    }

    #[test]
    fn test_empty_parts_removed() {
        let ctx = Context::new();
        let out = map_coalesce(&ctx, interval_set(&[(0, 5), (9, 3)])).unwrap();
        assert_eq!(out.n(), 1);
    }

    #[test]
    fn test_rational_pair_keeps_rational() {
        let ctx = Context::new();
        let mut map = interval_set(&[(0, 5), (3, 10)]);
        for p in map.parts.iter_mut() {
            p.flags.rational = true;
        }
        let out = map_coalesce(&ctx, map).unwrap();
        assert_eq!(out.n(), 1);
        assert!(out.parts[0].flags.rational);
    }
}
