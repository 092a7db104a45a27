//! Tableau view of a basic map: constraint classification, snapshots, and
//! incremental constraint edits.
//!
//! The tableau pairs one-to-one with a basic map during coalescing.
//! Constraints are indexed the way the owning basic map orders them:
//! equalities first, then inequalities; bound rows materialized from div
//! definitions and constraints added later follow behind and never disturb
//! the original indices.
//!
//! Classification of an external row against the tableau is by exact
//! rational extrema. On an integer tableau a row is treated as satisfied
//! when its minimum exceeds `-1` (integer points evaluate integrally), and
//! as adjacent when its maximum is exactly `-1`; a rational tableau only
//! distinguishes satisfied, violated, and cut.

use num_rational::BigRational;
use num_traits::{Signed, Zero};

use crate::error::{PstError, PstResult};
use crate::lp::{self, LpOutcome, QVec};
use crate::map::BasicMap;

/// Position of a single constraint relative to a tableau.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneqType {
    /// Satisfied by every point; implied by the tableau.
    Redundant,
    /// Satisfied by some points, violated by others.
    Cut,
    /// Violated by every point.
    Separate,
    /// The whole tableau lies on the hyperplane one unit outside the row.
    AdjEq,
    /// The row's opposite plus one touches an inequality face.
    AdjIneq,
}

#[derive(Debug, Clone)]
struct TabCon {
    row: Vec<i64>,
    eq: bool,
    redundant: bool,
    dead: bool,
    /// Materialized div bound, not a constraint of the owning basic map.
    synthetic: bool,
}

/// Saved tableau state; restoring is exact.
#[derive(Debug, Clone)]
pub struct TabSnapshot {
    cons: Vec<TabCon>,
    empty: bool,
    rational: bool,
}

#[derive(Debug, Clone)]
pub struct Tab {
    n_eq: usize,
    n_dim: usize,
    cons: Vec<TabCon>,
    rational: bool,
    pub empty: bool,
}

/// Outcome of a one-sided extremum query.
enum Extremum {
    Unbounded,
    Val(BigRational),
}

impl Tab {
    pub fn from_basic_map(bmap: &BasicMap) -> PstResult<Tab> {
        let n_dim = bmap.total_dim();
        let mut cons = Vec::with_capacity(bmap.eqs.len() + bmap.ineqs.len());
        for row in &bmap.eqs {
            cons.push(TabCon {
                row: row.clone(),
                eq: true,
                redundant: false,
                dead: false,
                synthetic: false,
            });
        }
        for row in &bmap.ineqs {
            cons.push(TabCon {
                row: row.clone(),
                eq: false,
                redundant: false,
                dead: false,
                synthetic: false,
            });
        }
        for row in bmap.div_bound_rows() {
            cons.push(TabCon {
                row,
                eq: false,
                redundant: false,
                dead: false,
                synthetic: true,
            });
        }
        let mut tab = Tab {
            n_eq: bmap.eqs.len(),
            n_dim,
            cons,
            rational: bmap.flags.rational,
            empty: bmap.flags.empty,
        };
        if !tab.empty {
            tab.refresh_empty()?;
        }
        Ok(tab)
    }

    pub fn n_dim(&self) -> usize {
        self.n_dim
    }

    pub fn is_rational(&self) -> bool {
        self.rational
    }

    pub fn mark_rational(&mut self) {
        self.rational = true;
    }

    pub fn snap(&self) -> TabSnapshot {
        TabSnapshot {
            cons: self.cons.clone(),
            empty: self.empty,
            rational: self.rational,
        }
    }

    pub fn rollback(&mut self, snap: &TabSnapshot) {
        self.cons = snap.cons.clone();
        self.empty = snap.empty;
        self.rational = snap.rational;
    }

    fn active_rows(&self) -> (Vec<QVec>, Vec<QVec>) {
        let mut ineqs = Vec::new();
        let mut eqs = Vec::new();
        for c in &self.cons {
            if c.dead {
                continue;
            }
            if c.eq {
                eqs.push(lp::qvec(&c.row));
            } else {
                ineqs.push(lp::qvec(&c.row));
            }
        }
        (ineqs, eqs)
    }

    fn refresh_empty(&mut self) -> PstResult<()> {
        let (ineqs, eqs) = self.active_rows();
        self.empty = !lp::feasible(&ineqs, &eqs, self.n_dim, false)?;
        Ok(())
    }

    fn extremum(&self, row: &[i64], maximize: bool, skip: Option<usize>) -> PstResult<Extremum> {
        let mut ineqs = Vec::new();
        let mut eqs = Vec::new();
        for (i, c) in self.cons.iter().enumerate() {
            if c.dead || Some(i) == skip || (skip.is_some() && c.redundant) {
                continue;
            }
            if c.eq {
                eqs.push(lp::qvec(&c.row));
            } else {
                ineqs.push(lp::qvec(&c.row));
            }
        }
        let obj = lp::qvec(row);
        let out = if maximize {
            lp::maximize(&ineqs, &eqs, self.n_dim, false, &obj)?
        } else {
            lp::minimize(&ineqs, &eqs, self.n_dim, false, &obj)?
        };
        match out {
            LpOutcome::Infeasible => Err(PstError::internal("extremum query on empty tableau")),
            LpOutcome::Unbounded => Ok(Extremum::Unbounded),
            LpOutcome::Optimal { value, .. } => Ok(Extremum::Val(value)),
        }
    }

    /// Classify the row against the tableau.
    pub fn ineq_type(&self, row: &[i64]) -> PstResult<IneqType> {
        if self.empty {
            return Err(PstError::internal("classifying against an empty tableau"));
        }
        if row.len() != 1 + self.n_dim {
            return Err(PstError::internal("classification row width mismatch"));
        }
        let min = self.extremum(row, false, None)?;
        let satisfied = match &min {
            Extremum::Unbounded => false,
            Extremum::Val(m) => {
                if self.rational {
                    !m.is_negative()
                } else {
                    *m > lp::qint(-1)
                }
            }
        };
        if satisfied {
            return Ok(IneqType::Redundant);
        }
        let max = match self.extremum(row, true, None)? {
            Extremum::Unbounded => return Ok(IneqType::Cut),
            Extremum::Val(v) => v,
        };
        if !max.is_negative() {
            return Ok(IneqType::Cut);
        }
        if !self.rational && max == lp::qint(-1) {
            if let Extremum::Val(m) = min {
                if m == lp::qint(-1) {
                    return Ok(IneqType::AdjEq);
                }
            }
            return Ok(IneqType::AdjIneq);
        }
        Ok(IneqType::Separate)
    }

    /// Turn constraint `idx` into an equality, restricting the tableau to
    /// that facet.
    pub fn select_facet(&mut self, idx: usize) -> PstResult<()> {
        self.cons[idx].eq = true;
        self.refresh_empty()
    }

    /// Relax constraint `idx` by one unit.
    pub fn relax(&mut self, idx: usize) {
        self.cons[idx].row[0] += 1;
    }

    /// Stop enforcing constraint `idx`.
    pub fn unrestrict(&mut self, idx: usize) {
        self.cons[idx].dead = true;
    }

    pub fn add_ineq(&mut self, row: &[i64]) -> PstResult<()> {
        debug_assert_eq!(row.len(), 1 + self.n_dim);
        self.cons.push(TabCon {
            row: row.to_vec(),
            eq: false,
            redundant: false,
            dead: false,
            synthetic: true,
        });
        self.refresh_empty()
    }

    pub fn add_eq(&mut self, row: &[i64]) -> PstResult<()> {
        debug_assert_eq!(row.len(), 1 + self.n_dim);
        self.cons.push(TabCon {
            row: row.to_vec(),
            eq: true,
            redundant: false,
            dead: false,
            synthetic: true,
        });
        self.refresh_empty()
    }

    pub fn is_redundant(&self, idx: usize) -> bool {
        !self.cons[idx].eq && self.cons[idx].redundant
    }

    pub fn is_equality(&self, idx: usize) -> bool {
        self.cons[idx].eq
    }

    /// Mark inequalities that are implied by the remaining constraints.
    /// A marked constraint stays in place but is ignored by later
    /// redundancy-sensitive consumers.
    pub fn detect_redundant(&mut self) -> PstResult<()> {
        if self.empty {
            return Ok(());
        }
        for k in 0..self.cons.len() {
            if self.cons[k].eq || self.cons[k].dead || self.cons[k].redundant {
                continue;
            }
            let row = self.cons[k].row.clone();
            let implied = match self.extremum(&row, false, Some(k))? {
                Extremum::Unbounded => false,
                Extremum::Val(m) => !m.is_negative(),
            };
            if implied {
                self.cons[k].redundant = true;
            }
        }
        Ok(())
    }

    /// Find inequalities whose opposite is also satisfied and mark them as
    /// equalities.
    pub fn detect_implicit_equalities(&mut self) -> PstResult<()> {
        if self.empty {
            return Ok(());
        }
        for k in 0..self.cons.len() {
            if self.cons[k].eq || self.cons[k].dead {
                continue;
            }
            let row = self.cons[k].row.clone();
            if let Extremum::Val(m) = self.extremum(&row, true, None)? {
                if m.is_zero() {
                    self.cons[k].eq = true;
                }
            }
        }
        Ok(())
    }

    /// Move inequalities of `bmap` that the tableau discovered to be
    /// equalities into the equality section. The caller rebuilds the
    /// tableau afterwards so that constraint indices line up again.
    pub fn make_equalities_explicit(&self, bmap: &BasicMap) -> BasicMap {
        let mut out = bmap.clone();
        out.eqs.clear();
        out.ineqs.clear();
        out.eqs.extend(bmap.eqs.iter().cloned());
        for (k, row) in bmap.ineqs.iter().enumerate() {
            if self.cons[self.n_eq + k].eq {
                out.eqs.push(row.clone());
            } else {
                out.ineqs.push(row.clone());
            }
        }
        out
    }

    /// Rebuild the basic map from the current tableau state: equality
    /// marks applied, redundant and dead rows dropped. Space, divs, and
    /// flags come from `bmap`.
    pub fn update_basic_map(&self, bmap: &BasicMap) -> BasicMap {
        let mut out = bmap.clone();
        out.eqs.clear();
        out.ineqs.clear();
        for c in &self.cons {
            if c.dead || c.synthetic {
                continue;
            }
            if c.eq {
                out.eqs.push(c.row.clone());
            } else if !c.redundant {
                out.ineqs.push(c.row.clone());
            }
        }
        out.flags.empty = self.empty;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::BasicMap;
    use crate::space::{Space, Tuple};

    fn interval(lo: i64, hi: i64) -> BasicMap {
        let space = Space::set(0, Tuple::named("S", 1));
        BasicMap::from_constraints(space, vec![], vec![vec![-lo, 1], vec![hi, -1]])
    }

    #[test]
    fn test_classification_on_interval() {
        let tab = Tab::from_basic_map(&interval(6, 10)).unwrap();
        // 5 - i over [6, 10] has max -1: adjacent inequality.
        assert_eq!(tab.ineq_type(&[5, -1]).unwrap(), IneqType::AdjIneq);
        // i over [6, 10] is satisfied everywhere.
        assert_eq!(tab.ineq_type(&[0, 1]).unwrap(), IneqType::Redundant);
        // 8 - i cuts the interval.
        assert_eq!(tab.ineq_type(&[8, -1]).unwrap(), IneqType::Cut);
        // 4 - i is violated everywhere, by at least two.
        assert_eq!(tab.ineq_type(&[4, -1]).unwrap(), IneqType::Separate);
    }

    #[test]
    fn test_adj_eq_on_point() {
        // Tableau is the single point i = 5; the row i - 6 sits one unit
        // outside an equality face.
        let space = Space::set(0, Tuple::named("S", 1));
        let bmap = BasicMap::from_constraints(space, vec![vec![-5, 1]], vec![]);
        let tab = Tab::from_basic_map(&bmap).unwrap();
        assert_eq!(tab.ineq_type(&[-6, 1]).unwrap(), IneqType::AdjEq);
    }

    #[test]
    fn test_rational_tableau_has_no_adjacency() {
        let mut bmap = interval(6, 10);
        bmap.flags.rational = true;
        let tab = Tab::from_basic_map(&bmap).unwrap();
        assert_eq!(tab.ineq_type(&[5, -1]).unwrap(), IneqType::Separate);
    }

    #[test]
    fn test_snapshot_rollback() {
        let mut tab = Tab::from_basic_map(&interval(0, 10)).unwrap();
        let snap = tab.snap();
        tab.add_eq(&[-20, 1]).unwrap();
        assert!(tab.empty);
        tab.rollback(&snap);
        assert!(!tab.empty);
        assert_eq!(tab.ineq_type(&[0, 1]).unwrap(), IneqType::Redundant);
    }

    #[test]
    fn test_detect_redundant() {
        let space = Space::set(0, Tuple::named("S", 1));
        let bmap = BasicMap::from_constraints(
            space,
            vec![],
            vec![vec![0, 1], vec![10, -1], vec![5, 1]],
        );
        let mut tab = Tab::from_basic_map(&bmap).unwrap();
        tab.detect_redundant().unwrap();
        assert!(!tab.is_redundant(0));
        assert!(!tab.is_redundant(1));
        assert!(tab.is_redundant(2));
        let updated = tab.update_basic_map(&bmap);
        assert_eq!(updated.ineqs.len(), 2);
    }

    #[test]
    fn test_implicit_equalities() {
        // x >= 3 and x <= 3 hide the equality x = 3.
        let bmap = interval(3, 3);
        let mut tab = Tab::from_basic_map(&bmap).unwrap();
        tab.detect_implicit_equalities().unwrap();
        assert!(tab.is_equality(0));
        assert!(tab.is_equality(1));
        let explicit = tab.make_equalities_explicit(&bmap);
        assert_eq!(explicit.eqs.len(), 2);
        assert!(explicit.ineqs.is_empty());
    }

    #[test]
    fn test_select_facet_and_relax() {
        let bmap = interval(0, 10);
        let mut tab = Tab::from_basic_map(&bmap).unwrap();
        let snap = tab.snap();
        tab.select_facet(1).unwrap();
        // On the facet i = 10, the row 10 - i is an implied equality and
        // the row i - 10 is satisfied.
        assert_eq!(tab.ineq_type(&[-10, 1]).unwrap(), IneqType::Redundant);
        tab.rollback(&snap);
        tab.relax(1);
        assert_eq!(tab.ineq_type(&[-12, 1]).unwrap(), IneqType::AdjIneq);
    }
}
