//! Exact dense linear programming over arbitrary-precision rationals.
//!
//! A deliberately small kernel: two-phase primal simplex with Bland's rule
//! on a dense dictionary of `BigRational` entries. Exactness is the point;
//! every classification and wrapping decision in the library reduces to the
//! sign of an optimum, so there is no tolerance tuning anywhere.
//!
//! Rows follow the library convention `[c0, a1, .., an]` for
//! `c0 + a1 x1 + .. + an xn >= 0` (or `= 0` for equality rows).

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, Zero};

use crate::error::{PstError, PstResult};

/// A row of rational coefficients, constant first.
pub type QVec = Vec<BigRational>;

/// Lift an integer row to rationals.
pub fn qvec(row: &[i64]) -> QVec {
    row.iter()
        .map(|&v| BigRational::from_integer(BigInt::from(v)))
        .collect()
}

/// A single rational from an integer.
pub fn qint(v: i64) -> BigRational {
    BigRational::from_integer(BigInt::from(v))
}

/// Result of an optimization query.
#[derive(Debug, Clone, PartialEq)]
pub enum LpOutcome {
    Infeasible,
    Unbounded,
    Optimal { value: BigRational, point: QVec },
}

impl LpOutcome {
    pub fn value(&self) -> Option<&BigRational> {
        match self {
            LpOutcome::Optimal { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Maximize `obj[0] + obj[1..]·x` subject to the given inequality and
/// equality rows. With `nonneg` set all variables are non-negative,
/// otherwise they are free.
pub fn maximize(ineqs: &[QVec], eqs: &[QVec], n: usize, nonneg: bool, obj: &QVec) -> PstResult<LpOutcome> {
    Dictionary::build(ineqs, eqs, n, nonneg)?.solve(obj, false)
}

/// Minimize `obj[0] + obj[1..]·x`; same conventions as [`maximize`].
pub fn minimize(ineqs: &[QVec], eqs: &[QVec], n: usize, nonneg: bool, obj: &QVec) -> PstResult<LpOutcome> {
    Dictionary::build(ineqs, eqs, n, nonneg)?.solve(obj, true)
}

/// Is the system satisfiable at all?
pub fn feasible(ineqs: &[QVec], eqs: &[QVec], n: usize, nonneg: bool) -> PstResult<bool> {
    let zero_obj = vec![BigRational::zero(); 1 + n];
    Ok(!matches!(
        maximize(ineqs, eqs, n, nonneg, &zero_obj)?,
        LpOutcome::Infeasible
    ))
}

/// Simplex dictionary. Basic variable `bs[i]` equals
/// `t[i][0] + sum_j t[i][1+j] * x_{nb[j]}`; nonbasic variables sit at zero.
struct Dictionary {
    n: usize,
    ns: usize,
    nonneg: bool,
    nb: Vec<usize>,
    bs: Vec<usize>,
    t: Vec<QVec>,
}

const AUX: usize = usize::MAX;

impl Dictionary {
    fn build(ineqs: &[QVec], eqs: &[QVec], n: usize, nonneg: bool) -> PstResult<Self> {
        let ns = if nonneg { n } else { 2 * n };
        // Standardized inequalities: slack = b - A x with slack >= 0.
        // Row r: c0 + a·x >= 0 becomes slack = c0 + a·x.
        let mut rows: Vec<QVec> = Vec::with_capacity(ineqs.len() + 2 * eqs.len());
        let mut push = |row: &QVec, negate: bool| -> PstResult<()> {
            if row.len() != 1 + n {
                return Err(PstError::internal("lp row width mismatch"));
            }
            let mut out = vec![BigRational::zero(); 1 + ns];
            let sign = if negate {
                -BigRational::from_integer(BigInt::from(1))
            } else {
                BigRational::from_integer(BigInt::from(1))
            };
            out[0] = &row[0] * &sign;
            for j in 0..n {
                let v = &row[1 + j] * &sign;
                if nonneg {
                    out[1 + j] = v;
                } else {
                    out[1 + 2 * j] = v.clone();
                    out[1 + 2 * j + 1] = -v;
                }
            }
            rows.push(out);
            Ok(())
        };
        for r in ineqs {
            push(r, false)?;
        }
        for r in eqs {
            push(r, false)?;
            push(r, true)?;
        }

        let m = rows.len();
        let nb: Vec<usize> = (0..ns).collect();
        let bs: Vec<usize> = (0..m).map(|i| ns + i).collect();
        Ok(Dictionary {
            n,
            ns,
            nonneg,
            nb,
            bs,
            t: rows,
        })
    }

    fn pivot(&mut self, r: usize, c: usize) {
        let width = self.nb.len();
        let piv = self.t[r][1 + c].clone();
        debug_assert!(!piv.is_zero());
        let mut newrow = vec![BigRational::zero(); 1 + width];
        newrow[0] = -&self.t[r][0] / &piv;
        for j in 0..width {
            if j == c {
                newrow[1 + j] = BigRational::from_integer(BigInt::from(1)) / &piv;
            } else {
                newrow[1 + j] = -&self.t[r][1 + j] / &piv;
            }
        }
        let old_basic = self.bs[r];
        self.bs[r] = self.nb[c];
        self.nb[c] = old_basic;
        self.t[r] = newrow;

        let pivot_row = self.t[r].clone();
        for i in 0..self.t.len() {
            if i == r {
                continue;
            }
            Self::substitute(&mut self.t[i], &pivot_row, c);
        }
    }

    /// Replace the variable in slot `c` of `row` by the expression in
    /// `pivot_row` (whose slot `c` now refers to the variable that left).
    fn substitute(row: &mut QVec, pivot_row: &QVec, c: usize) {
        let f = row[1 + c].clone();
        if f.is_zero() {
            return;
        }
        row[1 + c] = BigRational::zero();
        row[0] = &row[0] + &f * &pivot_row[0];
        for j in 0..pivot_row.len() - 1 {
            row[1 + j] = &row[1 + j] + &f * &pivot_row[1 + j];
        }
    }

    /// One simplex run on the current objective row (Bland's rule).
    /// Returns false when the objective is unbounded above.
    fn optimize(&mut self, obj_row: &mut QVec) -> bool {
        loop {
            // Entering variable: positive reduced cost, smallest id.
            let mut enter: Option<usize> = None;
            for j in 0..self.nb.len() {
                if obj_row[1 + j].is_positive()
                    && enter.map_or(true, |e| self.nb[j] < self.nb[e])
                {
                    enter = Some(j);
                }
            }
            let Some(c) = enter else {
                return true;
            };
            // Leaving row: tightest bound, ties by smallest basic id.
            let mut leave: Option<(usize, BigRational)> = None;
            for i in 0..self.t.len() {
                if self.t[i][1 + c].is_negative() {
                    let ratio = -&self.t[i][0] / &self.t[i][1 + c];
                    let better = match &leave {
                        None => true,
                        Some((li, lr)) => {
                            ratio < *lr || (ratio == *lr && self.bs[i] < self.bs[*li])
                        }
                    };
                    if better {
                        leave = Some((i, ratio));
                    }
                }
            }
            let Some((r, _)) = leave else {
                return false;
            };
            self.pivot(r, c);
            Self::substitute(obj_row, &self.t[r], c);
        }
    }

    /// Express an objective over structural variables in the current
    /// dictionary.
    fn objective_row(&self, obj: &QVec) -> QVec {
        let width = self.nb.len();
        let mut row = vec![BigRational::zero(); 1 + width];
        row[0] = obj[0].clone();
        // Structural coefficient for internal variable id v.
        let coef = |v: usize| -> BigRational {
            if v >= self.ns {
                return BigRational::zero();
            }
            if self.nonneg {
                obj[1 + v].clone()
            } else if v % 2 == 0 {
                obj[1 + v / 2].clone()
            } else {
                -obj[1 + v / 2].clone()
            }
        };
        for (j, &v) in self.nb.iter().enumerate() {
            row[1 + j] = &row[1 + j] + coef(v);
        }
        for (i, &v) in self.bs.iter().enumerate() {
            let f = coef(v);
            if f.is_zero() {
                continue;
            }
            row[0] = &row[0] + &f * &self.t[i][0];
            for j in 0..width {
                row[1 + j] = &row[1 + j] + &f * &self.t[i][1 + j];
            }
        }
        row
    }

    fn point(&self) -> QVec {
        let mut vals = vec![BigRational::zero(); self.ns];
        for (i, &v) in self.bs.iter().enumerate() {
            if v < self.ns {
                vals[v] = self.t[i][0].clone();
            }
        }
        if self.nonneg {
            vals
        } else {
            (0..self.n)
                .map(|j| &vals[2 * j] - &vals[2 * j + 1])
                .collect()
        }
    }

    fn solve(mut self, obj: &QVec, minimize: bool) -> PstResult<LpOutcome> {
        if obj.len() != 1 + self.n {
            return Err(PstError::internal("lp objective width mismatch"));
        }
        // Phase 1 when the all-zero point is not feasible.
        if self.t.iter().any(|r| r[0].is_negative()) {
            let aux_col = self.nb.len();
            self.nb.push(AUX);
            for row in self.t.iter_mut() {
                row.push(BigRational::from_integer(BigInt::from(1)));
            }
            // Make the dictionary feasible with one pivot on the most
            // negative row, then drive the auxiliary variable to zero.
            let mut worst = 0;
            for i in 1..self.t.len() {
                if self.t[i][0] < self.t[worst][0] {
                    worst = i;
                }
            }
            self.pivot(worst, aux_col);
            // AUX is now basic; express w = -AUX in the current dictionary.
            let i = self
                .bs
                .iter()
                .position(|&v| v == AUX)
                .ok_or_else(|| PstError::internal("auxiliary variable lost"))?;
            let mut w = vec![BigRational::zero(); 1 + self.nb.len()];
            w[0] = -self.t[i][0].clone();
            for j in 0..self.nb.len() {
                w[1 + j] = -self.t[i][1 + j].clone();
            }
            self.optimize(&mut w);
            if w[0].is_negative() {
                return Ok(LpOutcome::Infeasible);
            }
            // Pivot AUX out of the basis if it lingers there at level zero.
            if let Some(r) = self.bs.iter().position(|&v| v == AUX) {
                let c = (0..self.nb.len())
                    .find(|&j| self.nb[j] != AUX && !self.t[r][1 + j].is_zero());
                match c {
                    Some(c) => self.pivot(r, c),
                    None => {
                        self.t.remove(r);
                        self.bs.remove(r);
                    }
                }
            }
            // Drop the AUX column.
            if let Some(c) = self.nb.iter().position(|&v| v == AUX) {
                self.nb.remove(c);
                for row in self.t.iter_mut() {
                    row.remove(1 + c);
                }
            }
        }

        let signed_obj: QVec = if minimize {
            obj.iter().map(|v| -v).collect()
        } else {
            obj.clone()
        };
        let mut row = self.objective_row(&signed_obj);
        if !self.optimize(&mut row) {
            return Ok(LpOutcome::Unbounded);
        }
        let value = if minimize { -row[0].clone() } else { row[0].clone() };
        Ok(LpOutcome::Optimal {
            value,
            point: self.point(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(v: i64) -> BigRational {
        qint(v)
    }

    #[test]
    fn test_simple_max() {
        // max x + y with x <= 4, y <= 3, x,y >= 0.
        let ineqs = vec![qvec(&[4, -1, 0]), qvec(&[3, 0, -1])];
        let out = maximize(&ineqs, &[], 2, true, &qvec(&[0, 1, 1])).unwrap();
        match out {
            LpOutcome::Optimal { value, point } => {
                assert_eq!(value, q(7));
                assert_eq!(point, vec![q(4), q(3)]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_free_variables() {
        // min x with x + y = 2, y <= 1, free variables: x >= 1.
        let eqs = vec![qvec(&[-2, 1, 1])];
        let ineqs = vec![qvec(&[1, 0, -1])];
        let out = minimize(&ineqs, &eqs, 2, false, &qvec(&[0, 1, 0])).unwrap();
        assert_eq!(out.value(), Some(&q(1)));
    }

    #[test]
    fn test_infeasible() {
        // x >= 1 and -x >= 0.
        let ineqs = vec![qvec(&[-1, 1]), qvec(&[0, -1])];
        let out = maximize(&ineqs, &[], 1, false, &qvec(&[0, 1])).unwrap();
        assert_eq!(out, LpOutcome::Infeasible);
    }

    #[test]
    fn test_unbounded() {
        let ineqs = vec![qvec(&[0, 1])];
        let out = maximize(&ineqs, &[], 1, false, &qvec(&[0, 1])).unwrap();
        assert_eq!(out, LpOutcome::Unbounded);
    }

    #[test]
    fn test_fractional_optimum() {
        // max x with 2x <= 1.
        let ineqs = vec![qvec(&[1, -2])];
        let out = maximize(&ineqs, &[], 1, true, &qvec(&[0, 1])).unwrap();
        assert_eq!(
            out.value(),
            Some(&(q(1) / q(2)))
        );
    }

    #[test]
    fn test_degenerate_rational_vertex() {
        // max y with y <= x, y <= 2 - x: optimum 1 at x = 1.
        let ineqs = vec![qvec(&[0, 1, -1]), qvec(&[2, -1, -1])];
        let out = maximize(&ineqs, &[], 2, true, &qvec(&[0, 0, 1])).unwrap();
        assert_eq!(out.value(), Some(&q(1)));
    }
}
