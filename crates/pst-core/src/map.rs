//! Basic maps (convex integer polyhedra over a structured space) and maps
//! (finite unions of basic maps).
//!
//! A basic map stores equalities, inequalities, and local (existentially
//! quantified) div definitions. Constraint rows are laid out as
//! `[c0 | params | in | out | divs]`; a row means `c0 + a·x >= 0`
//! (inequality) or `= 0` (equality). A div definition
//! `x = floor((e0 + e·x) / d)` is a denominator plus a body row of the
//! same width; a denominator of zero marks the div as unknown.
//!
//! Maps are plain ordered sequences of basic maps over a common space;
//! their meaning is the union, and no normal form is maintained.

use crate::error::{PstError, PstResult};
use crate::lp;
use crate::seq;
use crate::space::Space;

/// A local dimension defined as a floor of an affine expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DivDef {
    /// Denominator; zero when the definition is unknown.
    pub denom: i64,
    /// Numerator row, full constraint width.
    pub body: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BMapFlags {
    pub is_final: bool,
    pub rational: bool,
    pub no_implicit: bool,
    pub no_redundant: bool,
    pub empty: bool,
}

/// A convex polyhedron given by equalities, inequalities, and divs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BasicMap {
    pub space: Space,
    pub eqs: Vec<Vec<i64>>,
    pub ineqs: Vec<Vec<i64>>,
    pub divs: Vec<DivDef>,
    pub flags: BMapFlags,
}

/// A basic map with an empty input tuple.
pub type BasicSet = BasicMap;

impl BasicMap {
    pub fn universe(space: Space) -> Self {
        BasicMap {
            space,
            eqs: Vec::new(),
            ineqs: Vec::new(),
            divs: Vec::new(),
            flags: BMapFlags::default(),
        }
    }

    pub fn from_constraints(space: Space, eqs: Vec<Vec<i64>>, ineqs: Vec<Vec<i64>>) -> Self {
        let mut bmap = BasicMap::universe(space);
        for row in eqs {
            bmap.add_eq(row);
        }
        for row in ineqs {
            bmap.add_ineq(row);
        }
        bmap
    }

    /// Number of columns excluding the constant.
    pub fn total_dim(&self) -> usize {
        self.space.dim() + self.divs.len()
    }

    pub fn row_len(&self) -> usize {
        1 + self.total_dim()
    }

    pub fn param_col(&self, i: usize) -> usize {
        1 + i
    }

    pub fn in_col(&self, i: usize) -> usize {
        1 + self.space.nparam + i
    }

    pub fn out_col(&self, i: usize) -> usize {
        1 + self.space.nparam + self.space.n_in() + i
    }

    pub fn div_col(&self, i: usize) -> usize {
        1 + self.space.dim() + i
    }

    pub fn add_eq(&mut self, row: Vec<i64>) {
        debug_assert_eq!(row.len(), self.row_len());
        self.eqs.push(row);
    }

    pub fn add_ineq(&mut self, row: Vec<i64>) {
        debug_assert_eq!(row.len(), self.row_len());
        self.ineqs.push(row);
    }

    /// Append a div; existing rows and bodies are widened by one column.
    pub fn add_div(&mut self, denom: i64, mut body: Vec<i64>) -> usize {
        for row in self.eqs.iter_mut().chain(self.ineqs.iter_mut()) {
            row.push(0);
        }
        for div in self.divs.iter_mut() {
            div.body.push(0);
        }
        body.push(0);
        debug_assert_eq!(body.len(), self.row_len() + 1);
        self.divs.push(DivDef { denom, body });
        self.divs.len() - 1
    }

    pub fn divs_known(&self) -> bool {
        self.divs.iter().all(|d| d.denom != 0)
    }

    pub fn same_divs(&self, other: &BasicMap) -> bool {
        self.divs == other.divs
    }

    /// Do any div bodies reference div columns?
    fn divs_reference_divs(&self) -> bool {
        let first = 1 + self.space.dim();
        self.divs
            .iter()
            .any(|d| d.body[first..].iter().any(|&v| v != 0))
    }

    /// The two bounding inequalities implied by each known div definition.
    pub fn div_bound_rows(&self) -> Vec<Vec<i64>> {
        let mut rows = Vec::new();
        for (i, div) in self.divs.iter().enumerate() {
            if div.denom == 0 {
                continue;
            }
            let col = self.div_col(i);
            let mut lower = div.body.clone();
            lower[col] -= div.denom;
            rows.push(lower);
            let mut upper: Vec<i64> = div.body.iter().map(|&v| -v).collect();
            upper[col] += div.denom;
            upper[0] += div.denom - 1;
            rows.push(upper);
        }
        rows
    }

    /// Bring the equalities into echelon form, eliminating variables from
    /// the back, and substitute them into the inequalities. Contradictions
    /// set the empty flag.
    pub fn gauss(&mut self) -> PstResult<()> {
        let total = self.total_dim();
        let mut done = 0;
        for col in (0..total).rev() {
            if done >= self.eqs.len() {
                break;
            }
            let Some(k) = (done..self.eqs.len()).find(|&k| self.eqs[k][1 + col] != 0) else {
                continue;
            };
            self.eqs.swap(done, k);
            if self.eqs[done][1 + col] < 0 {
                seq::neg(&mut self.eqs[done]);
            }
            let g = seq::gcd(&self.eqs[done][1..]);
            if g > 1 {
                if self.eqs[done][0] % g == 0 {
                    for v in self.eqs[done].iter_mut() {
                        *v /= g;
                    }
                } else if !self.flags.rational {
                    // The coefficients share a divisor the constant lacks:
                    // no integer point satisfies the equality.
                    self.flags.empty = true;
                    return Ok(());
                }
            }
            let pivot = self.eqs[done].clone();
            for r in 0..self.eqs.len() {
                if r != done {
                    seq::elim(&mut self.eqs[r], &pivot, 1 + col)?;
                }
            }
            for r in 0..self.ineqs.len() {
                seq::elim(&mut self.ineqs[r], &pivot, 1 + col)?;
            }
            done += 1;
        }
        // Leftover equality rows have no variable part.
        for k in (done..self.eqs.len()).rev() {
            if self.eqs[k][1..].iter().all(|&v| v == 0) {
                if self.eqs[k][0] != 0 {
                    self.flags.empty = true;
                    return Ok(());
                }
                self.eqs.remove(k);
            }
        }
        // Constant-only inequalities are either trivial or contradictions.
        for k in (0..self.ineqs.len()).rev() {
            if self.ineqs[k][1..].iter().all(|&v| v == 0) {
                if self.ineqs[k][0] < 0 {
                    self.flags.empty = true;
                    return Ok(());
                }
                self.ineqs.remove(k);
            }
        }
        Ok(())
    }

    /// Recover equalities encoded as opposite pairs of inequalities.
    pub fn detect_inequality_pairs(&mut self) {
        let mut i = 0;
        'outer: while i < self.ineqs.len() {
            for j in i + 1..self.ineqs.len() {
                if seq::is_neg(&self.ineqs[i], &self.ineqs[j]) {
                    let eq = self.ineqs[i].clone();
                    self.ineqs.remove(j);
                    self.ineqs.remove(i);
                    self.eqs.push(eq);
                    continue 'outer;
                }
            }
            i += 1;
        }
    }

    /// Order the divs canonically so that structurally equal local spaces
    /// compare equal. Skipped when div bodies reference other divs or are
    /// unknown.
    pub fn sort_divs(&mut self) {
        if self.divs.is_empty() || !self.divs_known() || self.divs_reference_divs() {
            return;
        }
        let n = self.divs.len();
        let mut order: Vec<usize> = (0..n).collect();
        let prefix = 1 + self.space.dim();
        order.sort_by(|&a, &b| {
            (self.divs[a].denom, &self.divs[a].body[..prefix])
                .cmp(&(self.divs[b].denom, &self.divs[b].body[..prefix]))
        });
        if order.iter().enumerate().all(|(i, &o)| i == o) {
            return;
        }
        let mut new_pos = vec![0; n];
        for (new, &old) in order.iter().enumerate() {
            new_pos[old] = new;
        }
        let base = self.space.dim();
        let remap = |row: &Vec<i64>| -> Vec<i64> {
            let mut out = row.clone();
            for old in 0..n {
                out[1 + base + new_pos[old]] = row[1 + base + old];
            }
            out
        };
        self.eqs = self.eqs.iter().map(remap).collect();
        self.ineqs = self.ineqs.iter().map(remap).collect();
        let mut divs = vec![
            DivDef {
                denom: 0,
                body: Vec::new()
            };
            n
        ];
        for old in 0..n {
            let mut d = self.divs[old].clone();
            d.body = remap(&d.body);
            divs[new_pos[old]] = d;
        }
        self.divs = divs;
    }

    /// Merge the (sorted, non-referencing) div lists of two basic maps.
    /// Returns the merged list and, for each input, the mapping from old
    /// div index to merged index.
    pub fn merge_divs(a: &BasicMap, b: &BasicMap) -> Option<(Vec<DivDef>, Vec<usize>, Vec<usize>)> {
        if !a.divs_known() || !b.divs_known() {
            return None;
        }
        if a.divs_reference_divs() || b.divs_reference_divs() {
            return None;
        }
        let prefix = 1 + a.space.dim();
        let key = |d: &DivDef| (d.denom, d.body[..prefix].to_vec());
        let mut merged: Vec<DivDef> = Vec::new();
        let mut exp_a = Vec::with_capacity(a.divs.len());
        let mut exp_b = Vec::with_capacity(b.divs.len());
        let (mut i, mut j) = (0, 0);
        while i < a.divs.len() || j < b.divs.len() {
            let next_a = (i < a.divs.len()).then(|| key(&a.divs[i]));
            let next_b = (j < b.divs.len()).then(|| key(&b.divs[j]));
            match (next_a, next_b) {
                (Some(ka), Some(kb)) if ka == kb => {
                    exp_a.push(merged.len());
                    exp_b.push(merged.len());
                    merged.push(a.divs[i].clone());
                    i += 1;
                    j += 1;
                }
                (Some(ka), Some(kb)) if ka < kb => {
                    exp_a.push(merged.len());
                    merged.push(a.divs[i].clone());
                    i += 1;
                }
                (Some(_), Some(_)) => {
                    exp_b.push(merged.len());
                    merged.push(b.divs[j].clone());
                    j += 1;
                }
                (Some(_), None) => {
                    exp_a.push(merged.len());
                    merged.push(a.divs[i].clone());
                    i += 1;
                }
                (None, Some(_)) => {
                    exp_b.push(merged.len());
                    merged.push(b.divs[j].clone());
                    j += 1;
                }
                (None, None) => break,
            }
        }
        // Normalize body widths to the merged div count.
        let width = prefix + merged.len();
        for d in merged.iter_mut() {
            d.body.resize(width, 0);
        }
        Some((merged, exp_a, exp_b))
    }

    /// Rewrite this basic map over the merged div list, moving old div
    /// columns to their new positions.
    pub fn expand_divs(&self, merged: &[DivDef], exp: &[usize]) -> BasicMap {
        let base = self.space.dim();
        let remap = |row: &Vec<i64>| -> Vec<i64> {
            let mut out = vec![0; 1 + base + merged.len()];
            out[..1 + base].copy_from_slice(&row[..1 + base]);
            for (old, &new) in exp.iter().enumerate() {
                out[1 + base + new] = row[1 + base + old];
            }
            out
        };
        BasicMap {
            space: self.space.clone(),
            eqs: self.eqs.iter().map(remap).collect(),
            ineqs: self.ineqs.iter().map(remap).collect(),
            divs: merged.to_vec(),
            flags: self.flags.clone(),
        }
    }

    /// Structural equality, ignoring flags.
    pub fn plain_equal(&self, other: &BasicMap) -> bool {
        self.space == other.space
            && self.eqs == other.eqs
            && self.ineqs == other.ineqs
            && self.divs == other.divs
    }

    /// All constraint rows, with the div bounds materialized, as rational
    /// rows for the LP kernel.
    fn lp_rows(&self) -> (Vec<lp::QVec>, Vec<lp::QVec>) {
        let mut ineqs: Vec<lp::QVec> = self.ineqs.iter().map(|r| lp::qvec(r)).collect();
        for row in self.div_bound_rows() {
            ineqs.push(lp::qvec(&row));
        }
        let eqs = self.eqs.iter().map(|r| lp::qvec(r)).collect();
        (ineqs, eqs)
    }

    /// Is the rational relaxation empty?
    pub fn rational_empty(&self) -> PstResult<bool> {
        if self.flags.empty {
            return Ok(true);
        }
        let (ineqs, eqs) = self.lp_rows();
        Ok(!lp::feasible(&ineqs, &eqs, self.total_dim(), false)?)
    }

    /// Does the basic map contain an integer point? Rational emptiness is
    /// checked first; marked-rational maps stop there.
    pub fn is_empty(&self) -> PstResult<bool> {
        if self.rational_empty()? {
            return Ok(true);
        }
        if self.flags.rational {
            return Ok(false);
        }
        let (ineqs, eqs) = self.lp_rows();
        Ok(!crate::ilp::integer_feasible_free(
            &ineqs,
            &eqs,
            self.total_dim(),
        )?)
    }

    /// Eliminate `n` columns starting at constraint column `first`
    /// (1-based like the rows) by substitution and Fourier-Motzkin.
    /// Divs are materialized and eliminated as well; the result is an
    /// existential projection of the rational relaxation.
    pub fn project_out_cols(&self, first: usize, n: usize) -> PstResult<(Vec<Vec<i64>>, Vec<Vec<i64>>)> {
        let mut eqs = self.eqs.clone();
        let mut ineqs = self.ineqs.clone();
        ineqs.extend(self.div_bound_rows());
        let mut cols: Vec<usize> = (first..first + n).collect();
        cols.extend((0..self.divs.len()).map(|i| self.div_col(i)));
        for &col in &cols {
            if let Some(k) = eqs.iter().position(|r| r[col] != 0) {
                let pivot = eqs.remove(k);
                for r in eqs.iter_mut() {
                    seq::elim(r, &pivot, col)?;
                }
                for r in ineqs.iter_mut() {
                    seq::elim(r, &pivot, col)?;
                }
                continue;
            }
            let (with, without): (Vec<_>, Vec<_>) = ineqs.into_iter().partition(|r| r[col] != 0);
            let mut next = without;
            for p in with.iter().filter(|r| r[col] > 0) {
                for q in with.iter().filter(|r| r[col] < 0) {
                    let mut row = p.clone();
                    seq::combine(&mut row, -q[col], p[col], q)?;
                    debug_assert_eq!(row[col], 0);
                    seq::normalize(&mut row);
                    next.push(row);
                }
            }
            ineqs = next;
        }
        // Strip the eliminated columns.
        let keep = |row: &Vec<i64>| -> Vec<i64> {
            row.iter()
                .enumerate()
                .filter(|(c, _)| !cols.contains(c))
                .map(|(_, &v)| v)
                .collect()
        };
        Ok((
            eqs.iter().map(keep).collect(),
            ineqs.iter().map(keep).collect(),
        ))
    }

    /// Domain of this relation as a basic set (rational projection).
    pub fn domain(&self) -> PstResult<BasicSet> {
        let first = self.out_col(0);
        let (eqs, ineqs) = self.project_out_cols(first, self.space.n_out())?;
        let mut out = BasicMap::universe(self.space.domain());
        out.eqs = eqs;
        out.ineqs = ineqs;
        out.gauss()?;
        Ok(out)
    }

    /// Range of this relation as a basic set (rational projection).
    pub fn range(&self) -> PstResult<BasicSet> {
        let first = self.in_col(0);
        let (eqs, ineqs) = self.project_out_cols(first, self.space.n_in())?;
        // The remaining columns are [params | out]; that is a set layout.
        let mut out = BasicMap::universe(self.space.range());
        out.eqs = eqs;
        out.ineqs = ineqs;
        out.gauss()?;
        Ok(out)
    }
}

/// A finite union of basic maps over a common space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Map {
    pub space: Space,
    pub parts: Vec<BasicMap>,
}

/// A map with an empty input tuple.
pub type Set = Map;

impl Map {
    pub fn empty(space: Space) -> Self {
        Map {
            space,
            parts: Vec::new(),
        }
    }

    pub fn from_basic_map(bmap: BasicMap) -> Self {
        Map {
            space: bmap.space.clone(),
            parts: vec![bmap],
        }
    }

    pub fn n(&self) -> usize {
        self.parts.len()
    }

    pub fn add_part(&mut self, bmap: BasicMap) {
        debug_assert_eq!(bmap.space, self.space);
        self.parts.push(bmap);
    }

    /// Drop parts that are obviously empty.
    pub fn remove_empty_parts(&mut self) {
        self.parts.retain(|p| !p.flags.empty);
    }

    pub fn sort_divs(&mut self) {
        for p in self.parts.iter_mut() {
            p.sort_divs();
        }
    }

    pub fn plain_equal(&self, other: &Map) -> bool {
        self.space == other.space
            && self.parts.len() == other.parts.len()
            && self
                .parts
                .iter()
                .zip(&other.parts)
                .all(|(a, b)| a.plain_equal(b))
    }

    pub fn is_empty(&self) -> PstResult<bool> {
        for p in &self.parts {
            if !p.is_empty()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Tuple;

    fn interval(lo: i64, hi: i64) -> BasicSet {
        let space = Space::set(0, Tuple::named("S", 1));
        BasicMap::from_constraints(space, vec![], vec![vec![-lo, 1], vec![hi, -1]])
    }

    #[test]
    fn test_gauss_contradiction() {
        let space = Space::set(0, Tuple::named("S", 1));
        let mut b = BasicMap::from_constraints(space, vec![vec![1, 0]], vec![]);
        b.gauss().unwrap();
        assert!(b.flags.empty);
    }

    #[test]
    fn test_gauss_substitutes() {
        // x = 2 with x >= 3 is empty after substitution.
        let space = Space::set(0, Tuple::named("S", 1));
        let mut b = BasicMap::from_constraints(space, vec![vec![-2, 1]], vec![vec![-3, 1]]);
        b.gauss().unwrap();
        assert!(b.flags.empty);
    }

    #[test]
    fn test_gauss_parity_contradiction() {
        // 2x = 1 has no integer solution.
        let space = Space::set(0, Tuple::named("S", 1));
        let mut b = BasicMap::from_constraints(space, vec![vec![-1, 2]], vec![]);
        b.gauss().unwrap();
        assert!(b.flags.empty);
    }

    #[test]
    fn test_detect_inequality_pairs() {
        let space = Space::set(0, Tuple::named("S", 1));
        let mut b = BasicMap::from_constraints(space, vec![], vec![vec![-2, 1], vec![2, -1]]);
        b.detect_inequality_pairs();
        assert_eq!(b.eqs.len(), 1);
        assert!(b.ineqs.is_empty());
    }

    #[test]
    fn test_rational_and_integer_empty() {
        let b = interval(0, 10);
        assert!(!b.is_empty().unwrap());
        let c = interval(7, 3);
        assert!(c.is_empty().unwrap());
    }

    #[test]
    fn test_integer_empty_rational_nonempty() {
        // 1 <= 2x <= 1 contains x = 1/2 but no integer.
        let space = Space::set(0, Tuple::named("S", 1));
        let b = BasicMap::from_constraints(
            space,
            vec![],
            vec![vec![-1, 2], vec![1, -2]],
        );
        assert!(!b.rational_empty().unwrap());
        assert!(b.is_empty().unwrap());
    }

    #[test]
    fn test_domain_projection() {
        // { S1[i] -> S2[j] : j = i, 0 <= j <= 5 }: domain is 0 <= i <= 5.
        let space = Space::map(0, Tuple::named("S1", 1), Tuple::named("S2", 1));
        let mut m = BasicMap::universe(space);
        m.add_eq(vec![0, 1, -1]);
        m.add_ineq(vec![0, 0, 1]);
        m.add_ineq(vec![5, 0, -1]);
        let dom = m.domain().unwrap();
        assert_eq!(dom.space.n_out(), 1);
        let probe = |v: i64| -> bool {
            dom.eqs
                .iter()
                .all(|r| r[0] + r[1] * v == 0)
                && dom.ineqs.iter().all(|r| r[0] + r[1] * v >= 0)
        };
        assert!(probe(0) && probe(5));
        assert!(!probe(6) && !probe(-1));
    }

    #[test]
    fn test_expand_divs() {
        let space = Space::set(0, Tuple::named("S", 1));
        let mut a = BasicMap::universe(space.clone());
        a.add_div(2, vec![0, 1]);
        a.add_ineq(vec![0, 0, 1]);
        let mut b = BasicMap::universe(space);
        b.add_div(2, vec![0, 1]);
        b.add_div(3, vec![1, 1, 0]);
        b.sort_divs();
        a.sort_divs();
        let (merged, exp_a, _exp_b) = BasicMap::merge_divs(&a, &b).unwrap();
        assert_eq!(merged.len(), 2);
        let ax = a.expand_divs(&merged, &exp_a);
        assert_eq!(ax.divs.len(), 2);
        assert_eq!(ax.ineqs[0].len(), 1 + 1 + 2);
    }
}
