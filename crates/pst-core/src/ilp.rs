//! Integer lexicographic minimization over non-negative variables.
//!
//! [`LpProblem`] is a growable exact problem with two column groups: a
//! leading block of integer-constrained columns (the schedule coefficient
//! variables, all non-negative) and a trailing block of rational columns
//! (Farkas multipliers from dual blocks; leaving them rational keeps the
//! dual cones exact). The lexicographic objective ranges over the integer
//! block only.
//!
//! The integer search is branch-and-bound around the rational
//! lexicographic minimum, branching on the first fractional coordinate.
//! A node budget bounds the search; exhausting it is reported as a design
//! limit, not silently truncated.

use num_rational::BigRational;
use num_traits::{ToPrimitive, Zero};

use crate::error::{PstError, PstResult};
use crate::lp::{self, LpOutcome, QVec};

/// A window of `(negative, positive)` column pairs of which at least one
/// pair must have a non-zero difference. `len` counts columns and is
/// always even.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub pos: usize,
    pub len: usize,
}

const BB_NODE_BUDGET: usize = 20_000;

#[derive(Debug, Clone, Default)]
pub struct LpProblem {
    n_int: usize,
    n_rat: usize,
    eqs: Vec<Vec<i64>>,
    ineqs: Vec<Vec<i64>>,
}

impl LpProblem {
    pub fn new(n_int: usize) -> Self {
        LpProblem {
            n_int,
            n_rat: 0,
            eqs: Vec::new(),
            ineqs: Vec::new(),
        }
    }

    pub fn n_int(&self) -> usize {
        self.n_int
    }

    pub fn width(&self) -> usize {
        self.n_int + self.n_rat
    }

    /// Append `k` rational multiplier columns; returns the first index.
    pub fn add_rat_cols(&mut self, k: usize) -> usize {
        let start = self.width();
        self.n_rat += k;
        start
    }

    /// Rows are `[c0 | columns...]`; short rows are padded with zeros up
    /// to the current width at solve time.
    pub fn add_eq(&mut self, row: Vec<i64>) -> usize {
        self.eqs.push(row);
        self.eqs.len() - 1
    }

    pub fn add_ineq(&mut self, row: Vec<i64>) -> usize {
        self.ineqs.push(row);
        self.ineqs.len() - 1
    }

    pub fn n_eq(&self) -> usize {
        self.eqs.len()
    }

    pub fn n_ineq(&self) -> usize {
        self.ineqs.len()
    }

    fn pad(&self, row: &[i64]) -> QVec {
        let mut out = lp::qvec(row);
        out.resize(1 + self.width(), BigRational::zero());
        out
    }

    fn base_rows(
        &self,
        skip_eqs: Option<(usize, usize)>,
        skip_ineqs: Option<(usize, usize)>,
    ) -> (Vec<QVec>, Vec<QVec>) {
        let in_range = |i: usize, r: Option<(usize, usize)>| r.map_or(false, |(a, b)| i >= a && i < b);
        let ineqs = self
            .ineqs
            .iter()
            .enumerate()
            .filter(|(i, _)| !in_range(*i, skip_ineqs))
            .map(|(_, r)| self.pad(r))
            .collect();
        let eqs = self
            .eqs
            .iter()
            .enumerate()
            .filter(|(i, _)| !in_range(*i, skip_eqs))
            .map(|(_, r)| self.pad(r))
            .collect();
        (ineqs, eqs)
    }

    pub fn feasible(&self) -> PstResult<bool> {
        let (ineqs, eqs) = self.base_rows(None, None);
        lp::feasible(&ineqs, &eqs, self.width(), true)
    }

    /// Feasibility with a block of rows excluded.
    pub fn feasible_without(
        &self,
        skip_eqs: (usize, usize),
        skip_ineqs: (usize, usize),
    ) -> PstResult<bool> {
        let (ineqs, eqs) = self.base_rows(Some(skip_eqs), Some(skip_ineqs));
        lp::feasible(&ineqs, &eqs, self.width(), true)
    }

    /// Rational lexicographic minimum over the integer block, or None when
    /// infeasible. The multiplier block is existential.
    fn rational_lexmin(
        &self,
        extra_ineqs: &[QVec],
        extra_eqs: &[QVec],
    ) -> PstResult<Option<Vec<BigRational>>> {
        let width = self.width();
        let (mut ineqs, mut eqs) = self.base_rows(None, None);
        ineqs.extend_from_slice(extra_ineqs);
        eqs.extend_from_slice(extra_eqs);

        let mut vals = Vec::with_capacity(self.n_int);
        for k in 0..self.n_int {
            let mut obj = vec![BigRational::zero(); 1 + width];
            obj[1 + k] = lp::qint(1);
            match lp::minimize(&ineqs, &eqs, width, true, &obj)? {
                LpOutcome::Infeasible => return Ok(None),
                LpOutcome::Unbounded => {
                    return Err(PstError::internal("non-negative minimum unbounded"))
                }
                LpOutcome::Optimal { value, .. } => {
                    let mut fix = vec![BigRational::zero(); 1 + width];
                    fix[0] = -value.clone();
                    fix[1 + k] = lp::qint(1);
                    eqs.push(fix);
                    vals.push(value);
                }
            }
        }
        Ok(Some(vals))
    }

    /// Integer lexicographic minimum over the integer block.
    pub fn lexmin_int(
        &self,
        extra_ineqs: &[QVec],
        extra_eqs: &[QVec],
    ) -> PstResult<Option<Vec<i64>>> {
        let mut best: Option<Vec<i64>> = None;
        let mut budget = BB_NODE_BUDGET;
        self.branch(
            &mut extra_ineqs.to_vec(),
            &mut extra_eqs.to_vec(),
            &mut best,
            &mut budget,
        )?;
        Ok(best)
    }

    fn branch(
        &self,
        ineqs: &mut Vec<QVec>,
        eqs: &mut Vec<QVec>,
        best: &mut Option<Vec<i64>>,
        budget: &mut usize,
    ) -> PstResult<()> {
        if *budget == 0 {
            return Err(PstError::unknown("integer search budget exhausted"));
        }
        *budget -= 1;

        let Some(sol) = self.rational_lexmin(ineqs, eqs)? else {
            return Ok(());
        };
        if let Some(b) = best {
            if lex_cmp(&sol, b) != std::cmp::Ordering::Less {
                return Ok(());
            }
        }
        let frac = sol.iter().position(|v| !v.is_integer());
        let Some(k) = frac else {
            let ints = sol
                .iter()
                .map(|v| {
                    v.to_integer()
                        .to_i64()
                        .ok_or_else(|| PstError::arithmetic("solution exceeds i64"))
                })
                .collect::<PstResult<Vec<i64>>>()?;
            *best = Some(ints);
            return Ok(());
        };
        let floor = sol[k].floor();
        let width = self.width();

        // Low side first: it contains any lexicographically smaller point.
        let mut low = vec![BigRational::zero(); 1 + width];
        low[0] = floor.clone();
        low[1 + k] = lp::qint(-1);
        ineqs.push(low);
        self.branch(ineqs, eqs, best, budget)?;
        ineqs.pop();

        let mut high = vec![BigRational::zero(); 1 + width];
        high[0] = -(floor + lp::qint(1));
        high[1 + k] = lp::qint(1);
        ineqs.push(high);
        self.branch(ineqs, eqs, best, budget)?;
        ineqs.pop();
        Ok(())
    }

    /// Integer lexmin subject to every region having at least one pair
    /// with a non-zero difference. Branches over the first such pair and
    /// its sign; earlier pairs of the region are pinned to a zero
    /// difference on each branch, so the branches partition the
    /// non-trivial solutions.
    pub fn lexmin_nontrivial(&self, regions: &[Region]) -> PstResult<Option<Vec<i64>>> {
        let mut ineqs: Vec<QVec> = Vec::new();
        let mut eqs: Vec<QVec> = Vec::new();
        self.nontrivial_rec(regions, 0, &mut ineqs, &mut eqs)
    }

    fn nontrivial_rec(
        &self,
        regions: &[Region],
        idx: usize,
        ineqs: &mut Vec<QVec>,
        eqs: &mut Vec<QVec>,
    ) -> PstResult<Option<Vec<i64>>> {
        if idx == regions.len() {
            return self.lexmin_int(ineqs, eqs);
        }
        let r = regions[idx];
        if r.len == 0 {
            return self.nontrivial_rec(regions, idx + 1, ineqs, eqs);
        }
        let width = self.width();
        let pair_diff = |p: usize, sign: i64| -> QVec {
            let mut row = vec![BigRational::zero(); 1 + width];
            row[1 + r.pos + 2 * p] = lp::qint(-sign);
            row[1 + r.pos + 2 * p + 1] = lp::qint(sign);
            row
        };
        let n_pairs = r.len / 2;
        let mut best: Option<Vec<i64>> = None;
        for p in 0..n_pairs {
            for sign in [1i64, -1] {
                for q in 0..p {
                    eqs.push(pair_diff(q, 1));
                }
                let mut one = pair_diff(p, sign);
                one[0] = lp::qint(-1);
                ineqs.push(one);

                let sol = self.nontrivial_rec(regions, idx + 1, ineqs, eqs)?;

                ineqs.pop();
                for _ in 0..p {
                    eqs.pop();
                }

                best = match (best, sol) {
                    (None, s) => s,
                    (b, None) => b,
                    (Some(b), Some(s)) => {
                        if int_lex_cmp(&s, &b) == std::cmp::Ordering::Less {
                            Some(s)
                        } else {
                            Some(b)
                        }
                    }
                };
            }
        }
        Ok(best)
    }

    /// Rational lexmin scaled to integers: returns the common denominator
    /// and the scaled coordinate values.
    pub fn nonneg_lexmin(&self) -> PstResult<Option<(i64, Vec<i64>)>> {
        let Some(sol) = self.rational_lexmin(&[], &[])? else {
            return Ok(None);
        };
        let mut denom: i64 = 1;
        for v in &sol {
            let d = v
                .denom()
                .to_i64()
                .ok_or_else(|| PstError::arithmetic("denominator exceeds i64"))?;
            denom = num_integer::lcm(denom, d);
        }
        let vals = sol
            .iter()
            .map(|v| {
                (v * lp::qint(denom))
                    .to_integer()
                    .to_i64()
                    .ok_or_else(|| PstError::arithmetic("solution exceeds i64"))
            })
            .collect::<PstResult<Vec<i64>>>()?;
        Ok(Some((denom, vals)))
    }
}

fn lex_cmp(a: &[BigRational], b: &[i64]) -> std::cmp::Ordering {
    for (x, &y) in a.iter().zip(b) {
        let yq = lp::qint(y);
        match x.cmp(&yq) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

fn int_lex_cmp(a: &[i64], b: &[i64]) -> std::cmp::Ordering {
    a.cmp(b)
}

/// Does a system over free integer variables admit an integer point?
/// Variables are split into non-negative pairs and searched with the same
/// branch-and-bound as the scheduling problems.
pub fn integer_feasible_free(ineqs: &[QVec], eqs: &[QVec], n: usize) -> PstResult<bool> {
    let prob = LpProblem::new(2 * n);
    let remap = |row: &QVec| -> QVec {
        let mut out = vec![BigRational::zero(); 1 + 2 * n];
        out[0] = row[0].clone();
        for j in 0..n {
            out[1 + 2 * j] = row[1 + j].clone();
            out[1 + 2 * j + 1] = -row[1 + j].clone();
        }
        out
    };
    let extra_ineqs: Vec<QVec> = ineqs.iter().map(&remap).collect();
    let extra_eqs: Vec<QVec> = eqs.iter().map(&remap).collect();
    Ok(prob.lexmin_int(&extra_ineqs, &extra_eqs)?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_lexmin_fixes_coordinates() {
        // x + y >= 3 with x, y >= 0: lexmin is (0, 3).
        let mut prob = LpProblem::new(2);
        prob.add_ineq(vec![-3, 1, 1]);
        let (d, v) = prob.nonneg_lexmin().unwrap().unwrap();
        assert_eq!(d, 1);
        assert_eq!(v, vec![0, 3]);
    }

    #[test]
    fn test_rational_lexmin_fractional() {
        // 2x >= 1, minimized: x = 1/2 scaled by 2.
        let mut prob = LpProblem::new(1);
        prob.add_ineq(vec![-1, 2]);
        let (d, v) = prob.nonneg_lexmin().unwrap().unwrap();
        assert_eq!((d, v), (2, vec![1]));
    }

    #[test]
    fn test_integer_lexmin_rounds_up() {
        // 2x >= 1 has integer lexmin x = 1.
        let mut prob = LpProblem::new(1);
        prob.add_ineq(vec![-1, 2]);
        let sol = prob.lexmin_int(&[], &[]).unwrap().unwrap();
        assert_eq!(sol, vec![1]);
    }

    #[test]
    fn test_integer_lexmin_couples_coordinates() {
        // 3x + 2y = 5 over non-negative integers: lexmin (1, 1).
        let mut prob = LpProblem::new(2);
        prob.add_eq(vec![-5, 3, 2]);
        let sol = prob.lexmin_int(&[], &[]).unwrap().unwrap();
        assert_eq!(sol, vec![1, 1]);
    }

    #[test]
    fn test_nontrivial_region() {
        // One (neg, pos) pair under x + y <= 2: the smallest solution
        // with a non-zero difference is (0, 1).
        let mut prob = LpProblem::new(2);
        prob.add_ineq(vec![2, -1, -1]);
        let sol = prob
            .lexmin_nontrivial(&[Region { pos: 0, len: 2 }])
            .unwrap()
            .unwrap();
        assert_eq!(sol, vec![0, 1]);
    }

    #[test]
    fn test_nontrivial_two_regions() {
        // Two independent pairs; each needs a non-zero difference.
        let mut prob = LpProblem::new(4);
        prob.add_ineq(vec![10, -1, -1, -1, -1]);
        let sol = prob
            .lexmin_nontrivial(&[Region { pos: 0, len: 2 }, Region { pos: 2, len: 2 }])
            .unwrap()
            .unwrap();
        assert_eq!(sol, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_nontrivial_rejects_cancelling_pair() {
        // The pair difference is forced to zero by 2x = 2y, so only the
        // second pair can witness non-triviality.
        let mut prob = LpProblem::new(4);
        prob.add_eq(vec![0, 2, -2, 0, 0]);
        let sol = prob
            .lexmin_nontrivial(&[Region { pos: 0, len: 4 }])
            .unwrap()
            .unwrap();
        assert_eq!(sol, vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_rational_multipliers_stay_rational() {
        // x = 2*lambda and 2*lambda = 1: integral x requires lambda = 1/2.
        let mut prob = LpProblem::new(1);
        let m = prob.add_rat_cols(1);
        prob.add_eq(vec![0, -1, 2]);
        let mut row = vec![0; 1 + m + 1];
        row[0] = -1;
        row[1 + m] = 2;
        prob.add_eq(row);
        let sol = prob.lexmin_int(&[], &[]).unwrap().unwrap();
        assert_eq!(sol, vec![1]);
    }

    #[test]
    fn test_infeasible() {
        let mut prob = LpProblem::new(1);
        prob.add_ineq(vec![-1, -1]);
        assert!(prob.lexmin_int(&[], &[]).unwrap().is_none());
        assert!(!prob.feasible().unwrap());
    }

    #[test]
    fn test_feasible_without() {
        let mut prob = LpProblem::new(1);
        let bad = prob.add_ineq(vec![-1, -1]);
        prob.add_ineq(vec![5, -1]);
        assert!(!prob.feasible().unwrap());
        assert!(prob.feasible_without((0, 0), (bad, bad + 1)).unwrap());
    }
}
