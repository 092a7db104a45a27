//! Dense integer matrices and the unimodular column reduction behind the
//! scheduler's change of basis.
//!
//! `left_hermite` brings a matrix `S` to column echelon form `H = S U`
//! with `U` unimodular and also returns `Q = U^{-1}` (so `S = H Q`). The
//! first `rank` columns of `H` are the non-zero ones; the first `rank`
//! rows of `Q` then span the row space of `S`, which is exactly what the
//! schedule needs to force linear independence of new rows.

use serde::{Deserialize, Serialize};

use crate::error::{PstError, PstResult};
use crate::seq;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mat {
    n_row: usize,
    n_col: usize,
    rows: Vec<Vec<i64>>,
}

impl Mat {
    pub fn zero(n_row: usize, n_col: usize) -> Self {
        Mat {
            n_row,
            n_col,
            rows: vec![vec![0; n_col]; n_row],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Mat::zero(n, n);
        for i in 0..n {
            m.rows[i][i] = 1;
        }
        m
    }

    pub fn from_rows(rows: Vec<Vec<i64>>, n_col: usize) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == n_col));
        Mat {
            n_row: rows.len(),
            n_col,
            rows,
        }
    }

    pub fn n_row(&self) -> usize {
        self.n_row
    }

    pub fn n_col(&self) -> usize {
        self.n_col
    }

    pub fn row(&self, i: usize) -> &[i64] {
        &self.rows[i]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut Vec<i64> {
        &mut self.rows[i]
    }

    pub fn get(&self, i: usize, j: usize) -> i64 {
        self.rows[i][j]
    }

    pub fn set(&mut self, i: usize, j: usize, v: i64) {
        self.rows[i][j] = v;
    }

    /// Copy of the block starting at `(r0, c0)` with `nr` rows, `nc` cols.
    pub fn sub_matrix(&self, r0: usize, nr: usize, c0: usize, nc: usize) -> Mat {
        let rows = (r0..r0 + nr)
            .map(|i| self.rows[i][c0..c0 + nc].to_vec())
            .collect();
        Mat::from_rows(rows, nc)
    }

    pub fn add_rows(&mut self, n: usize) {
        for _ in 0..n {
            self.rows.push(vec![0; self.n_col]);
        }
        self.n_row += n;
    }

    pub fn drop_rows(&mut self, first: usize, n: usize) {
        self.rows.drain(first..first + n);
        self.n_row -= n;
    }

    pub fn transpose(&self) -> Mat {
        let mut t = Mat::zero(self.n_col, self.n_row);
        for i in 0..self.n_row {
            for j in 0..self.n_col {
                t.rows[j][i] = self.rows[i][j];
            }
        }
        t
    }

    /// Matrix-vector product, checked.
    pub fn vec_product(&self, v: &[i64]) -> PstResult<Vec<i64>> {
        if v.len() != self.n_col {
            return Err(PstError::internal("matrix-vector dimension mismatch"));
        }
        let mut out = Vec::with_capacity(self.n_row);
        for row in &self.rows {
            let mut acc: i64 = 0;
            for (a, x) in row.iter().zip(v) {
                let t = a
                    .checked_mul(*x)
                    .ok_or_else(|| PstError::arithmetic("matrix product overflow"))?;
                acc = acc
                    .checked_add(t)
                    .ok_or_else(|| PstError::arithmetic("matrix product overflow"))?;
            }
            out.push(acc);
        }
        Ok(out)
    }

    /// Divide row `i` (all entries) by `g`; entries must be divisible.
    pub fn scale_down_row(&mut self, i: usize, g: i64) -> PstResult<()> {
        if g == 0 {
            return Err(PstError::internal("scale_down_row by zero"));
        }
        for v in self.rows[i].iter_mut() {
            if *v % g != 0 {
                return Err(PstError::internal("scale_down_row: not divisible"));
            }
            *v /= g;
        }
        Ok(())
    }

    /// Number of leading columns that contain a non-zero entry.
    pub fn initial_non_zero_cols(&self) -> usize {
        for j in 0..self.n_col {
            if (0..self.n_row).all(|i| self.rows[i][j] == 0) {
                return j;
            }
        }
        self.n_col
    }

    /// Left Hermite reduction: returns `(H, U, Q)` with `self * U = H`,
    /// `U` unimodular, `Q = U^{-1}`, and all columns of `H` past the rank
    /// identically zero.
    pub fn left_hermite(&self) -> PstResult<(Mat, Mat, Mat)> {
        let n = self.n_col;
        let mut h = self.clone();
        let mut u = Mat::identity(n);
        let mut q = Mat::identity(n);
        let mut r = 0;

        for i in 0..h.n_row {
            if r >= n {
                break;
            }
            loop {
                let mut piv: Option<usize> = None;
                for c in r..n {
                    if h.rows[i][c] != 0
                        && piv.map_or(true, |p| h.rows[i][c].abs() < h.rows[i][p].abs())
                    {
                        piv = Some(c);
                    }
                }
                let Some(p) = piv else { break };
                let mut done = true;
                for c in r..n {
                    if c == p || h.rows[i][c] == 0 {
                        continue;
                    }
                    let f = h.rows[i][c].div_euclid(h.rows[i][p]);
                    if f != 0 {
                        col_combine(&mut h, &mut u, &mut q, c, p, f)?;
                    }
                    if h.rows[i][c] != 0 {
                        done = false;
                    }
                }
                if done {
                    if p != r {
                        col_swap(&mut h, &mut u, &mut q, p, r);
                    }
                    if h.rows[i][r] < 0 {
                        col_negate(&mut h, &mut u, &mut q, r);
                    }
                    r += 1;
                    break;
                }
            }
        }

        Ok((h, u, q))
    }

    /// Product `self * other`, checked.
    pub fn product(&self, other: &Mat) -> PstResult<Mat> {
        if self.n_col != other.n_row {
            return Err(PstError::internal("matrix product dimension mismatch"));
        }
        let mut out = Mat::zero(self.n_row, other.n_col);
        for i in 0..self.n_row {
            for j in 0..other.n_col {
                let mut acc: i64 = 0;
                for k in 0..self.n_col {
                    let t = self.rows[i][k]
                        .checked_mul(other.rows[k][j])
                        .ok_or_else(|| PstError::arithmetic("matrix product overflow"))?;
                    acc = acc
                        .checked_add(t)
                        .ok_or_else(|| PstError::arithmetic("matrix product overflow"))?;
                }
                out.rows[i][j] = acc;
            }
        }
        Ok(out)
    }

    /// Gcd of the entries of row `i` starting at column `c0`.
    pub fn row_gcd(&self, i: usize, c0: usize) -> i64 {
        seq::gcd(&self.rows[i][c0..])
    }
}

/// Column `c` -= `f` * column `p` on H and U; the inverse row operation
/// (row `p` += `f` * row `c`) on Q.
fn col_combine(h: &mut Mat, u: &mut Mat, q: &mut Mat, c: usize, p: usize, f: i64) -> PstResult<()> {
    let sub = |m: &mut Mat| -> PstResult<()> {
        for i in 0..m.n_row {
            let t = f
                .checked_mul(m.rows[i][p])
                .ok_or_else(|| PstError::arithmetic("hermite reduction overflow"))?;
            m.rows[i][c] = m.rows[i][c]
                .checked_sub(t)
                .ok_or_else(|| PstError::arithmetic("hermite reduction overflow"))?;
        }
        Ok(())
    };
    sub(h)?;
    sub(u)?;
    for j in 0..q.n_col {
        let t = f
            .checked_mul(q.rows[c][j])
            .ok_or_else(|| PstError::arithmetic("hermite reduction overflow"))?;
        q.rows[p][j] = q.rows[p][j]
            .checked_add(t)
            .ok_or_else(|| PstError::arithmetic("hermite reduction overflow"))?;
    }
    Ok(())
}

fn col_swap(h: &mut Mat, u: &mut Mat, q: &mut Mat, a: usize, b: usize) {
    for m in [&mut *h, &mut *u] {
        for i in 0..m.n_row {
            m.rows[i].swap(a, b);
        }
    }
    q.rows.swap(a, b);
}

fn col_negate(h: &mut Mat, u: &mut Mat, q: &mut Mat, c: usize) {
    for m in [&mut *h, &mut *u] {
        for i in 0..m.n_row {
            m.rows[i][c] = -m.rows[i][c];
        }
    }
    for v in q.rows[c].iter_mut() {
        *v = -*v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_hermite(s: &Mat) {
        let (h, u, q) = s.left_hermite().unwrap();
        assert_eq!(s.product(&u).unwrap(), h);
        // Q is the inverse of U.
        assert_eq!(u.product(&q).unwrap(), Mat::identity(s.n_col()));
        // Columns past the rank are zero.
        let rank = h.initial_non_zero_cols();
        for j in rank..h.n_col() {
            for i in 0..h.n_row() {
                assert_eq!(h.get(i, j), 0);
            }
        }
    }

    #[test]
    fn test_hermite_simple() {
        let s = Mat::from_rows(vec![vec![2, 4]], 2);
        let (h, _, _) = s.left_hermite().unwrap();
        assert_eq!(h.initial_non_zero_cols(), 1);
        check_hermite(&s);
    }

    #[test]
    fn test_hermite_full_rank() {
        let s = Mat::from_rows(vec![vec![1, 2, 3], vec![0, 1, 1]], 3);
        let (h, _, _) = s.left_hermite().unwrap();
        assert_eq!(h.initial_non_zero_cols(), 2);
        check_hermite(&s);
    }

    #[test]
    fn test_hermite_empty() {
        let s = Mat::zero(0, 3);
        let (h, u, q) = s.left_hermite().unwrap();
        assert_eq!(h.initial_non_zero_cols(), 0);
        assert_eq!(u, Mat::identity(3));
        assert_eq!(q, Mat::identity(3));
    }

    #[test]
    fn test_hermite_dependent_rows() {
        let s = Mat::from_rows(vec![vec![1, 1], vec![2, 2], vec![3, 3]], 2);
        let (h, _, _) = s.left_hermite().unwrap();
        assert_eq!(h.initial_non_zero_cols(), 1);
        check_hermite(&s);
    }

    #[test]
    fn test_vec_product() {
        let m = Mat::from_rows(vec![vec![1, 2], vec![3, 4]], 2);
        assert_eq!(m.vec_product(&[1, 1]).unwrap(), vec![3, 7]);
    }
}
