//! Wrapping constraints around ridges.
//!
//! Given a bound hyperplane `b >= 0` that contains one side of a union and
//! a constraint `c` of the polyhedron on the other side, the wrap of `c`
//! around the ridge `{b = 0} n {c = 0}` is the combination `t*b + c` with
//! the smallest `t >= 0` that is still satisfied by the whole target set.
//! The rotation is computed exactly: homogenize the target set with a
//! scaling variable, normalize `b` to one, and maximize `-c`. An unbounded
//! rotation means the target set recedes in the direction of `b` and no
//! wrapping constraint exists; that case is signalled by handing back the
//! bound row itself, which the callers treat as "give up on this set".

use num_traits::{Signed, ToPrimitive};

use pst_core::error::{PstError, PstResult};
use pst_core::lp::{self, LpOutcome, QVec};
use pst_core::map::{BasicMap, BasicSet};
use pst_core::seq;
use pst_core::tab::Tab;
use pst_core::Context;

use super::Status;

/// Accumulator for wrapping constraints, with the optional cap on
/// coefficient size that `coalesce_bounded_wrapping` requests.
pub(super) struct Wraps {
    pub rows: Vec<Vec<i64>>,
    bounded: bool,
    max: i64,
}

impl Wraps {
    /// The cap is the largest coefficient among the constraints of either
    /// basic map that a fusion would drop.
    pub(super) fn new(
        ctx: &Context,
        bmap_i: &BasicMap,
        eq_i: &[Status],
        ineq_i: &[Status],
        bmap_j: &BasicMap,
        eq_j: &[Status],
        ineq_j: &[Status],
    ) -> Wraps {
        let mut wraps = Wraps {
            rows: Vec::new(),
            bounded: ctx.options.coalesce_bounded_wrapping,
            max: 0,
        };
        if wraps.bounded {
            wraps.update_max(bmap_i, eq_i, ineq_i);
            wraps.update_max(bmap_j, eq_j, ineq_j);
        }
        wraps
    }

    fn update_max(&mut self, bmap: &BasicMap, eq: &[Status], ineq: &[Status]) {
        for (k, row) in bmap.eqs.iter().enumerate() {
            if eq[2 * k] == Status::Valid && eq[2 * k + 1] == Status::Valid {
                continue;
            }
            self.max = self.max.max(seq::abs_max(&row[1..]));
        }
        for (k, row) in bmap.ineqs.iter().enumerate() {
            if ineq[k] == Status::Valid || ineq[k] == Status::Redundant {
                continue;
            }
            self.max = self.max.max(seq::abs_max(&row[1..]));
        }
    }

    fn allow(&self, row: &[i64]) -> bool {
        !self.bounded || seq::abs_max(&row[1..]) <= self.max
    }

    /// Wrap every non-redundant constraint of `bmap` around `bound` so
    /// that it covers all of `sets`, appending the results. Equalities
    /// contribute both orientations. On an unbounded direction, or on a
    /// wrap that violates the coefficient cap, the accumulator is emptied
    /// to tell the caller that wrapping failed.
    pub(super) fn add_wraps(
        &mut self,
        bmap: &BasicMap,
        tab: &Tab,
        bound: &[i64],
        sets: &[&BasicSet],
    ) -> PstResult<()> {
        let n_eq = bmap.eqs.len();
        for (l, row) in bmap.ineqs.iter().enumerate() {
            if seq::is_neg(bound, row) || bound == row.as_slice() {
                continue;
            }
            if tab.is_redundant(n_eq + l) {
                continue;
            }
            if !self.push_wrap(sets, bound, row)? {
                return Ok(());
            }
        }
        for row in &bmap.eqs {
            if seq::is_neg(bound, row) || bound == row.as_slice() {
                continue;
            }
            let negated: Vec<i64> = row.iter().map(|&v| -v).collect();
            if !self.push_wrap(sets, bound, &negated)? {
                return Ok(());
            }
            if !self.push_wrap(sets, bound, row)? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Returns false after emptying the accumulator when the wrap failed.
    fn push_wrap(&mut self, sets: &[&BasicSet], bound: &[i64], ridge: &[i64]) -> PstResult<bool> {
        let row = wrap_facet(sets, bound, ridge)?;
        if row == bound {
            self.rows.clear();
            return Ok(false);
        }
        if !self.allow(&row) {
            self.rows.clear();
            return Ok(false);
        }
        self.rows.push(row);
        Ok(true)
    }
}

/// Rotate `ridge` around its intersection with `{bound = 0}` until the
/// result is tangent to every set in `sets`. Returns the bound row itself
/// when some set is unbounded in the rotation direction.
pub(super) fn wrap_facet(sets: &[&BasicSet], bound: &[i64], ridge: &[i64]) -> PstResult<Vec<i64>> {
    let mut best: Option<num_rational::BigRational> = None;
    for set in sets {
        match facet_rotation(set, bound, ridge)? {
            Rotation::Unbounded => return Ok(bound.to_vec()),
            Rotation::NoContact => {}
            Rotation::Value(t) => {
                best = Some(match best {
                    None => t,
                    Some(b) => {
                        if t > b {
                            t
                        } else {
                            b
                        }
                    }
                });
            }
        }
    }
    let t = match best {
        Some(t) if t.is_positive() => t,
        _ => {
            let mut row = ridge.to_vec();
            seq::normalize(&mut row);
            return Ok(row);
        }
    };
    let p = t
        .numer()
        .to_i64()
        .ok_or_else(|| PstError::arithmetic("wrap coefficient exceeds i64"))?;
    let q = t
        .denom()
        .to_i64()
        .ok_or_else(|| PstError::arithmetic("wrap coefficient exceeds i64"))?;
    let mut row = bound.to_vec();
    seq::scale(&mut row, p)?;
    let mut scaled_ridge = ridge.to_vec();
    seq::scale(&mut scaled_ridge, q)?;
    seq::combine(&mut row, 1, 1, &scaled_ridge)?;
    seq::normalize(&mut row);
    Ok(row)
}

enum Rotation {
    /// `sup { -ridge(x)/bound(x) : x in set, bound(x) > 0 }` is infinite.
    Unbounded,
    /// The set has no points with `bound(x) > 0`.
    NoContact,
    Value(num_rational::BigRational),
}

/// Solve the homogenized rotation program for a single basic set.
fn facet_rotation(set: &BasicSet, bound: &[i64], ridge: &[i64]) -> PstResult<Rotation> {
    let total = set.total_dim();
    debug_assert_eq!(bound.len(), 1 + total);
    // Variables: scaling s, then the homogenized point coordinates.
    let n = 1 + total;
    let homogenize = |row: &[i64]| -> QVec {
        let mut out = vec![lp::qint(0); 1 + n];
        for (c, &v) in row.iter().enumerate() {
            out[1 + c] = lp::qint(v);
        }
        out
    };
    let mut ineqs: Vec<QVec> = set.ineqs.iter().map(|r| homogenize(r)).collect();
    for row in set.div_bound_rows() {
        ineqs.push(homogenize(&row));
    }
    // s >= 0.
    let mut s_row = vec![lp::qint(0); 1 + n];
    s_row[1] = lp::qint(1);
    ineqs.push(s_row);
    let mut eqs: Vec<QVec> = set.eqs.iter().map(|r| homogenize(r)).collect();
    // bound normalized to one.
    let mut b_row = homogenize(bound);
    b_row[0] = lp::qint(-1);
    eqs.push(b_row);

    let mut obj = homogenize(ridge);
    for v in obj.iter_mut() {
        *v = -v.clone();
    }
    match lp::maximize(&ineqs, &eqs, n, false, &obj)? {
        LpOutcome::Infeasible => Ok(Rotation::NoContact),
        LpOutcome::Unbounded => Ok(Rotation::Unbounded),
        LpOutcome::Optimal { value, .. } => Ok(Rotation::Value(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pst_core::map::BasicMap;
    use pst_core::space::{Space, Tuple};

    fn triangle_left() -> BasicSet {
        // { (i, j) : 0 <= i <= 5, 0 <= j <= i }
        let space = Space::set(0, Tuple::named("S", 2));
        BasicMap::from_constraints(
            space,
            vec![],
            vec![
                vec![0, 1, 0],
                vec![5, -1, 0],
                vec![0, 0, 1],
                vec![0, 1, -1],
            ],
        )
    }

    #[test]
    fn test_wrap_facet_rotates_to_tangent() {
        // Wrap j >= 0 around the bound 6 - i >= 0 to cover the left
        // triangle: already valid, so it comes back unrotated.
        let set = triangle_left();
        let bound = vec![6, -1, 0];
        let row = wrap_facet(&[&set], &bound, &[0, 0, 1]).unwrap();
        assert_eq!(row, vec![0, 0, 1]);
    }

    #[test]
    fn test_wrap_facet_needs_rotation() {
        // Wrap 5 - j >= 0 (valid on the right part only) around i = 5
        // raised by one, over the left triangle. The ridge rotation tilts
        // the row toward i - j >= 0 like shapes.
        let set = triangle_left();
        // bound: 6 - i (one unit beyond i <= 5, oriented toward the set).
        let bound = vec![6, -1, 0];
        let ridge = vec![-1, 0, 1]; // j >= 1, violated at j = 0
        let row = wrap_facet(&[&set], &bound, &ridge).unwrap();
        // The wrap must be valid on the whole triangle.
        for (i, j) in [(0, 0), (5, 0), (5, 5), (3, 2)] {
            let v = row[0] + row[1] * i + row[2] * j;
            assert!(v >= 0, "wrap {:?} violated at ({}, {})", row, i, j);
        }
        // And it must still pass through the ridge point (5, 1) where
        // bound+ and ridge meet at distance zero from both.
        assert_ne!(row, bound);
    }

    #[test]
    fn test_wrap_unbounded_returns_bound() {
        // The half plane { (i, j) : j >= 0 } recedes along i, so rotating
        // -i >= 0 around j + 1 >= 0 never touches it.
        let space = Space::set(0, Tuple::named("S", 2));
        let set = BasicMap::from_constraints(space, vec![], vec![vec![0, 0, 1]]);
        let bound = vec![1, 0, 1];
        let ridge = vec![0, -1, 0];
        let row = wrap_facet(&[&set], &bound, &ridge).unwrap();
        assert_eq!(row, bound);
    }

    #[test]
    fn test_wrap_recession_direction_gives_trivial_row() {
        // { i >= 0 } with bound 1 + i and ridge -i: the rotation is
        // tangent only at infinity, yielding the trivial row 1 >= 0.
        let space = Space::set(0, Tuple::named("S", 1));
        let set = BasicMap::from_constraints(space, vec![], vec![vec![0, 1]]);
        let row = wrap_facet(&[&set], &[1, 1], &[0, -1]).unwrap();
        assert_eq!(row, vec![1, 0]);
    }
}
