//! Compressed sparse row matrix with optional block width.
//!
//! `SparseMatrix<T, N>` owns a flat value array of exactly
//! `N × topology.nonzero()` entries keyed to a shared [`SparseTopology`].
//! With `N > 1`, sparsity row `i` describes the `N` consecutive logical rows
//! `N*i .. N*i + N`, and entry `p` of the pattern carries the values
//! `values[N*p .. N*p + N]` (one per logical row), all in column
//! `indices[p]`. Vector-valued unknowns assembled on one mesh graph use this
//! to avoid repeating the pattern per component.
//!
//! Numeric kernels fork across independent row ranges with rayon. The
//! transposed product is the only kernel where rows race on an output slot;
//! it accumulates through atomics.
//!
//! Structural edits ([`drop_tiny`](SparseMatrix::drop_tiny),
//! [`permute`](SparseMatrix::permute)) build a complete new pattern and value
//! array before replacing the old pair, so the length invariant never breaks.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CsrMatrix, SparseFormatError};
use rayon::prelude::*;

use crate::atomic::AtomicAccumulator;
use crate::scalar::{Cast, Scalar};
use crate::topology::{PatternError, SparseTopology};

/// Rows per rayon task in the row-parallel kernels.
const MIN_ROWS_PER_TASK: usize = 256;

/// Sparse matrix in CSR layout; see the module documentation for block width.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix<T, const N: usize = 1> {
    topology: Arc<SparseTopology>,
    values: Vec<T>,
    ncols: usize,
}

fn column_count(topology: &SparseTopology, hint: usize) -> usize {
    topology.max_column().map_or(hint, |c| hint.max(c + 1))
}

impl<T: Scalar, const N: usize> SparseMatrix<T, N> {
    /// Zero-valued matrix on `topology`.
    ///
    /// The column count is `max(ncols_hint, 1 + max column index)`.
    pub fn new(topology: impl Into<Arc<SparseTopology>>, ncols_hint: usize) -> Self {
        let topology = topology.into();
        let values = vec![T::zero(); N * topology.nonzero()];
        Self::from_values(topology, values, ncols_hint)
    }

    /// Matrix from a pattern and matching values.
    ///
    /// # Panics
    /// If `values.len() != N * topology.nonzero()`.
    pub fn from_values(
        topology: impl Into<Arc<SparseTopology>>,
        values: Vec<T>,
        ncols_hint: usize,
    ) -> Self {
        const { assert!(N > 0, "block width must be positive") };
        let topology = topology.into();
        assert_eq!(
            values.len(),
            N * topology.nonzero(),
            "value array length must be block width times nonzero count"
        );
        let ncols = column_count(&topology, ncols_hint);
        Self {
            topology,
            values,
            ncols,
        }
    }

    /// Matrix with no rows, to be filled by [`append_row`](Self::append_row).
    pub fn empty(ncols_hint: usize) -> Self {
        Self::from_values(SparseTopology::new(), Vec::new(), ncols_hint)
    }

    /// Append one sparsity row.
    ///
    /// `cols` must be sorted and unique; `values` holds `N` values per column.
    /// A shared topology is cloned before it is extended.
    pub fn append_row(&mut self, cols: &[usize], values: &[T]) {
        assert_eq!(values.len(), N * cols.len());
        Arc::make_mut(&mut self.topology).append_row(cols);
        self.values.extend_from_slice(values);
        if let Some(&last) = cols.last() {
            self.ncols = self.ncols.max(last + 1);
        }
    }

    /// Number of logical rows (`N` per sparsity row).
    #[inline]
    pub fn nrows(&self) -> usize {
        N * self.topology.nrows()
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    pub fn block_width(&self) -> usize {
        N
    }

    /// Number of stored pattern entries (not counting block repetition).
    #[inline]
    pub fn nonzero(&self) -> usize {
        self.topology.nonzero()
    }

    pub fn topology(&self) -> &Arc<SparseTopology> {
        &self.topology
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Column indices and values of sparsity row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[T]) {
        let range = self.topology.row_range(i);
        (
            &self.topology.indices()[range.clone()],
            &self.values[N * range.start..N * range.end],
        )
    }

    /// Position of pattern entry `(i, j)`; `None` when not stored.
    #[inline]
    pub fn lookup(&self, i: usize, j: usize) -> Option<usize> {
        self.topology.lookup(i, j)
    }

    /// Approximate heap footprint in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.values.len() * std::mem::size_of::<T>()
            + (self.topology.nonzero() + self.topology.nrows() + 1) * std::mem::size_of::<usize>()
    }

    /// `y = A·x + beta·y`, parallel over rows.
    ///
    /// With `beta == 0` the previous contents of `y` are ignored.
    pub fn multiply(&self, x: &[T], beta: T, y: &mut [T]) {
        debug_assert_eq!(x.len(), self.ncols, "multiply: x has wrong length");
        debug_assert_eq!(y.len(), self.nrows(), "multiply: y has wrong length");
        let topo = &*self.topology;
        let cols = topo.indices();
        let values = &self.values[..];
        let overwrite = beta.is_zero();

        y.par_chunks_mut(N)
            .enumerate()
            .with_min_len(MIN_ROWS_PER_TASK)
            .for_each(|(i, yi)| {
                let mut acc = [T::zero(); N];
                for p in topo.row_range(i) {
                    let xj = x[cols[p]];
                    let block = &values[N * p..N * p + N];
                    for k in 0..N {
                        acc[k] += block[k] * xj;
                    }
                }
                for k in 0..N {
                    yi[k] = if overwrite { acc[k] } else { acc[k] + beta * yi[k] };
                }
            });
    }

    /// `A·x` into a freshly allocated vector.
    pub fn mul_vec(&self, x: &DVector<T>) -> DVector<T> {
        let mut y = DVector::zeros(self.nrows());
        self.multiply(x.as_slice(), T::zero(), y.as_mut_slice());
        y
    }

    /// `y += alpha·Aᵀ·x`.
    ///
    /// Rows are processed in parallel; different rows may hit the same
    /// output slot, so every update goes through an atomic accumulator.
    pub fn multiply_transposed(&self, alpha: T, x: &[T], y: &mut [T]) {
        debug_assert_eq!(x.len(), self.nrows(), "multiply_transposed: x has wrong length");
        debug_assert_eq!(y.len(), self.ncols, "multiply_transposed: y has wrong length");
        let topo = &*self.topology;
        let cols = topo.indices();
        let values = &self.values[..];
        let acc = AtomicAccumulator::from_slice(y);

        (0..topo.nrows())
            .into_par_iter()
            .with_min_len(MIN_ROWS_PER_TASK)
            .for_each(|i| {
                let xi = &x[N * i..N * i + N];
                for p in topo.row_range(i) {
                    let block = &values[N * p..N * p + N];
                    let mut s = T::zero();
                    for k in 0..N {
                        s += block[k] * xi[k];
                    }
                    acc.add(cols[p], alpha * s);
                }
            });

        acc.store_into(y);
    }

    /// Multiply every stored value by `factor`.
    pub fn scale(&mut self, factor: T) {
        self.values.par_iter_mut().for_each(|v| *v *= factor);
    }

    /// Sum of each logical row, absent entries counting as zero.
    pub fn row_sums(&self) -> Vec<T> {
        let topo = &*self.topology;
        let values = &self.values[..];
        let mut sums = vec![T::zero(); self.nrows()];
        sums.par_chunks_mut(N)
            .enumerate()
            .with_min_len(MIN_ROWS_PER_TASK)
            .for_each(|(i, si)| {
                for p in topo.row_range(i) {
                    for k in 0..N {
                        si[k] += values[N * p + k];
                    }
                }
            });
        sums
    }

    /// Fill values row by row in parallel.
    ///
    /// `f(i, cols, values)` receives sparsity row `i`, its column indices and
    /// the mutable `N * cols.len()` values of that row.
    pub fn assemble_rows<F>(&mut self, f: F)
    where
        F: Fn(usize, &[usize], &mut [T]) + Sync + Send,
    {
        let topo = Arc::clone(&self.topology);
        let mut rows: Vec<&mut [T]> = Vec::with_capacity(topo.nrows());
        let mut rest = &mut self.values[..];
        for i in 0..topo.nrows() {
            let len = N * topo.row_range(i).len();
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(len);
            rows.push(head);
            rest = tail;
        }
        rows.into_par_iter()
            .enumerate()
            .with_min_len(MIN_ROWS_PER_TASK)
            .for_each(|(i, vals)| f(i, topo.row(i), vals));
    }

    /// Remove entries whose values are all at most `threshold` in modulus.
    ///
    /// Entries holding a logical diagonal are always kept so that diagonal
    /// regularization stays possible; for sparsity row `i` those are the
    /// columns `N*i..N*i+N`. Returns the number of removed entries.
    pub fn drop_tiny(&mut self, threshold: f64) -> usize {
        let topo = &*self.topology;
        let mut pruned = SparseTopology::with_capacity(topo.nrows(), topo.nonzero());
        let mut values = Vec::with_capacity(self.values.len());
        let mut cols = Vec::new();
        for i in 0..topo.nrows() {
            cols.clear();
            let diagonal = N * i..N * i + N;
            for p in topo.row_range(i) {
                let j = topo.indices()[p];
                let block = &self.values[N * p..N * p + N];
                if diagonal.contains(&j) || block.iter().any(|v| v.modulus_f64() > threshold) {
                    cols.push(j);
                    values.extend_from_slice(block);
                }
            }
            pruned.append_row(&cols);
        }
        let dropped = topo.nonzero() - pruned.nonzero();
        if dropped > 0 {
            self.topology = Arc::new(pruned);
            self.values = values;
        }
        dropped
    }

    /// Copy with rows and columns reordered (`perm[new] = old`).
    ///
    /// `row_perm` permutes sparsity rows, `col_perm` has length `ncols`.
    /// Values are moved, never recomputed.
    pub fn permute(&self, row_perm: &[usize], col_perm: &[usize]) -> Self {
        debug_assert_eq!(col_perm.len(), self.ncols, "permute: column permutation length");
        let (topology, map) = self.topology.permuted(row_perm, col_perm);
        let mut values = Vec::with_capacity(self.values.len());
        for &p in &map {
            values.extend_from_slice(&self.values[N * p..N * p + N]);
        }
        Self {
            topology: Arc::new(topology),
            values,
            ncols: self.ncols,
        }
    }

    /// Convert values to another precision, sharing the pattern.
    pub fn cast<S: Scalar>(&self) -> SparseMatrix<S, N>
    where
        T: Cast<S>,
    {
        SparseMatrix {
            topology: Arc::clone(&self.topology),
            values: self.values.par_iter().map(|&v| Cast::<S>::cast(v)).collect(),
            ncols: self.ncols,
        }
    }

    /// Logical `(row, col, value)` triplets in storage order.
    pub fn to_triplets(&self) -> Vec<(usize, usize, T)> {
        let topo = &*self.topology;
        let mut triplets = Vec::with_capacity(self.values.len());
        for i in 0..topo.nrows() {
            for p in topo.row_range(i) {
                let j = topo.indices()[p];
                for k in 0..N {
                    triplets.push((N * i + k, j, self.values[N * p + k]));
                }
            }
        }
        triplets
    }

    /// Dense copy, for small systems and tests.
    pub fn to_dense(&self) -> DMatrix<T> {
        let mut dense = DMatrix::zeros(self.nrows(), self.ncols);
        for (r, c, v) in self.to_triplets() {
            dense[(r, c)] += v;
        }
        dense
    }
}

impl<T: Scalar> SparseMatrix<T> {
    /// Assemble from coordinate triplets; duplicates are summed.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, T)]) -> Self {
        let mut order: Vec<usize> = (0..triplets.len()).collect();
        order.sort_unstable_by_key(|&k| (triplets[k].0, triplets[k].1));

        let mut topology = SparseTopology::with_capacity(nrows, triplets.len());
        let mut values: Vec<T> = Vec::with_capacity(triplets.len());
        let mut cols: Vec<usize> = Vec::new();
        let mut cursor = order.iter().peekable();
        for i in 0..nrows {
            cols.clear();
            while let Some(&&k) = cursor.peek() {
                let (r, c, v) = triplets[k];
                debug_assert!(r < nrows, "triplet row {} out of range", r);
                if r != i {
                    break;
                }
                if cols.last() == Some(&c) {
                    if let Some(last) = values.last_mut() {
                        *last += v;
                    }
                } else {
                    cols.push(c);
                    values.push(v);
                }
                cursor.next();
            }
            topology.append_row(&cols);
        }
        Self::from_values(topology, values, ncols)
    }

    /// Adopt a `nalgebra_sparse` CSR matrix.
    pub fn from_csr(csr: &CsrMatrix<T>) -> Result<Self, PatternError> {
        let (offsets, indices, values) = csr.csr_data();
        let topology = SparseTopology::from_parts(offsets.to_vec(), indices.to_vec())?;
        Ok(Self::from_values(topology, values.to_vec(), csr.ncols()))
    }

    /// Copy into a `nalgebra_sparse` CSR matrix.
    pub fn to_csr(&self) -> Result<CsrMatrix<T>, SparseFormatError> {
        CsrMatrix::try_from_csr_data(
            self.nrows(),
            self.ncols,
            self.topology.offsets().to_vec(),
            self.topology.indices().to_vec(),
            self.values.clone(),
        )
    }

    /// Value of entry `(i, j)`; `None` when the entry is not stored.
    ///
    /// Absent entries are not reported as zero. Use [`diagonal`](Self::diagonal)
    /// or [`row_sums`](Self::row_sums) when implicit zeros are wanted.
    pub fn get(&self, i: usize, j: usize) -> Option<T> {
        self.lookup(i, j).map(|p| self.values[p])
    }

    pub fn get_mut(&mut self, i: usize, j: usize) -> Option<&mut T> {
        self.lookup(i, j).map(move |p| &mut self.values[p])
    }

    /// Diagonal with zeros substituted for absent entries.
    pub fn diagonal(&self) -> Vec<T> {
        let n = self.nrows().min(self.ncols);
        (0..n).map(|i| self.get(i, i).unwrap_or_else(T::zero)).collect()
    }

    /// Add `shift` to every stored diagonal entry.
    ///
    /// Returns the number of rows without a stored diagonal entry.
    pub fn add_diagonal(&mut self, shift: T) -> usize {
        let mut missing = 0;
        for p in self.topology.diagonal_positions() {
            match p {
                Some(p) => self.values[p] += shift,
                None => missing += 1,
            }
        }
        missing
    }

    /// Push each stored diagonal entry away from zero.
    ///
    /// `a_ii += sign(re a_ii) * (rel * |a_ii| + abs)`, with a zero real part
    /// treated as positive. Returns the number of rows without a stored
    /// diagonal entry.
    pub fn sign_perturb_diagonal(&mut self, rel: f64, abs: f64) -> usize {
        let mut missing = 0;
        for p in self.topology.diagonal_positions() {
            let Some(p) = p else {
                missing += 1;
                continue;
            };
            let d = self.values[p];
            let lanes = d.to_lanes();
            let magnitude = rel * d.modulus_f64() + abs;
            let delta = if lanes[0] < 0.0 { -magnitude } else { magnitude };
            self.values[p] = T::from_lanes([lanes[0] + delta, lanes[1]]);
        }
        missing
    }

    /// Explicit transpose.
    pub fn transpose(&self) -> Self {
        let (topology, map) = self.topology.transpose(self.ncols);
        let values = map.iter().map(|&p| self.values[p]).collect();
        Self::from_values(topology, values, self.nrows())
    }

    /// Scatter-add a dense element matrix over the global indices `dofs`.
    ///
    /// Contributions to entries missing from the pattern are skipped and
    /// counted in the return value.
    pub fn add_element(&mut self, dofs: &[usize], element: &DMatrix<T>) -> usize {
        debug_assert_eq!(element.nrows(), dofs.len());
        debug_assert_eq!(element.ncols(), dofs.len());
        let mut missing = 0;
        for (a, &i) in dofs.iter().enumerate() {
            for (b, &j) in dofs.iter().enumerate() {
                match self.topology.lookup(i, j) {
                    Some(p) => self.values[p] += element[(a, b)],
                    None => missing += 1,
                }
            }
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// [[2,0,0],[1,3,0],[0,0,5]]
    fn lower_example() -> SparseMatrix<f64> {
        SparseMatrix::from_triplets(
            3,
            3,
            &[(0, 0, 2.0), (1, 0, 1.0), (1, 1, 3.0), (2, 2, 5.0)],
        )
    }

    #[test]
    fn multiply_matches_dense_product() {
        let a = lower_example();
        let x = [1.0, 1.0, 1.0];
        let mut y = [0.0; 3];
        a.multiply(&x, 0.0, &mut y);
        assert_eq!(y, [2.0, 4.0, 5.0]);
    }

    #[test]
    fn multiply_accumulates_with_beta() {
        let a = lower_example();
        let mut y = [1.0, 1.0, 1.0];
        a.multiply(&[1.0, 0.0, 0.0], 2.0, &mut y);
        assert_eq!(y, [4.0, 3.0, 2.0]);
    }

    #[test]
    fn multiply_with_zero_beta_ignores_nan_output() {
        let a = lower_example();
        let mut y = [f64::NAN; 3];
        a.multiply(&[1.0, 1.0, 1.0], 0.0, &mut y);
        assert_eq!(y, [2.0, 4.0, 5.0]);
    }

    #[test]
    fn multiply_transposed_sums_columns() {
        let a = lower_example();
        let mut y = [0.0; 3];
        a.multiply_transposed(1.0, &[1.0, 1.0, 1.0], &mut y);
        assert_eq!(y, [3.0, 3.0, 5.0]);

        let mut y = [1.0; 3];
        a.multiply_transposed(-1.0, &[1.0, 1.0, 1.0], &mut y);
        assert_eq!(y, [-2.0, -2.0, -4.0]);
    }

    #[test]
    fn multiply_transposed_large_parallel() {
        // every row writes column 0, so all rayon tasks contend on one slot
        let n = 5000;
        let rows: Vec<Vec<usize>> = (0..n).map(|i| if i == 0 { vec![0] } else { vec![0, i] }).collect();
        let topo = SparseTopology::from_rows(rows);
        let nnz = topo.nonzero();
        let a = SparseMatrix::<f64>::from_values(topo, vec![1.0; nnz], n);
        let x = vec![1.0; n];
        let mut y = vec![0.0; n];
        a.multiply_transposed(1.0, &x, &mut y);
        assert_eq!(y[0], n as f64);
        assert!(y[1..].iter().all(|&v| v == 1.0));
    }

    #[test]
    fn block_rows_share_pattern() {
        // two logical rows per sparsity row: [[1,2],[3,4]] on pattern {0,1}
        let topo = SparseTopology::from_rows([vec![0, 1]]);
        let a = SparseMatrix::<f64, 2>::from_values(topo, vec![1.0, 3.0, 2.0, 4.0], 0);
        assert_eq!(a.nrows(), 2);
        assert_eq!(a.ncols(), 2);
        let mut y = [0.0; 2];
        a.multiply(&[1.0, 1.0], 0.0, &mut y);
        assert_eq!(y, [3.0, 7.0]);

        let mut z = [0.0; 2];
        a.multiply_transposed(1.0, &[1.0, 0.0], &mut z);
        assert_eq!(z, [1.0, 2.0]);
        assert_eq!(a.row_sums(), vec![3.0, 7.0]);
    }

    #[test]
    fn ncols_uses_hint_or_max_column() {
        let topo = SparseTopology::from_rows([vec![0, 4]]);
        let a = SparseMatrix::<f64>::new(topo.clone(), 2);
        assert_eq!(a.ncols(), 5);
        let b = SparseMatrix::<f64>::new(topo, 10);
        assert_eq!(b.ncols(), 10);
        assert_eq!(b.values().len(), 2);
    }

    #[test]
    fn append_row_builds_incrementally() {
        let mut a = SparseMatrix::<f64>::empty(0);
        a.append_row(&[0, 2], &[1.0, 2.0]);
        a.append_row(&[], &[]);
        a.append_row(&[1], &[3.0]);
        assert_eq!(a.nrows(), 3);
        assert_eq!(a.ncols(), 3);
        assert_eq!(a.get(0, 2), Some(2.0));
        assert_eq!(a.get(2, 1), Some(3.0));
    }

    #[test]
    fn append_row_does_not_touch_shared_pattern() {
        let a = lower_example();
        let mut b = a.clone();
        b.append_row(&[0], &[7.0]);
        assert_eq!(a.nrows(), 3);
        assert_eq!(b.nrows(), 4);
        assert_eq!(a.topology().nonzero(), 4);
    }

    #[test]
    fn get_reports_absent_entries() {
        let a = lower_example();
        assert_eq!(a.get(1, 0), Some(1.0));
        assert_eq!(a.get(0, 1), None);
        assert_eq!(a.diagonal(), vec![2.0, 3.0, 5.0]);
    }

    #[test]
    fn diagonal_substitutes_zero() {
        let a = SparseMatrix::from_triplets(2, 2, &[(0, 1, 4.0), (1, 1, 1.0)]);
        assert_eq!(a.diagonal(), vec![0.0, 1.0]);
        assert_eq!(a.row_sums(), vec![4.0, 1.0]);
    }

    #[test]
    fn from_triplets_sums_duplicates() {
        let a = SparseMatrix::from_triplets(
            2,
            2,
            &[(1, 1, 1.0), (0, 0, 1.0), (1, 1, 2.5), (0, 1, -1.0)],
        );
        assert_eq!(a.nonzero(), 3);
        assert_eq!(a.get(1, 1), Some(3.5));
        assert_eq!(a.topology().row(0), &[0, 1]);
    }

    #[test]
    fn scale_and_add_diagonal() {
        let mut a = lower_example();
        a.scale(2.0);
        assert_eq!(a.get(1, 0), Some(2.0));
        let missing = a.add_diagonal(1.0);
        assert_eq!(missing, 0);
        assert_eq!(a.diagonal(), vec![5.0, 7.0, 11.0]);

        let mut b = SparseMatrix::from_triplets(2, 2, &[(0, 1, 1.0), (1, 1, 1.0)]);
        assert_eq!(b.add_diagonal(1.0), 1);
    }

    #[test]
    fn sign_perturb_moves_away_from_zero() {
        let mut a = SparseMatrix::from_triplets(
            3,
            3,
            &[(0, 0, -2.0), (1, 1, 0.0), (2, 2, 4.0)],
        );
        a.sign_perturb_diagonal(0.5, 0.25);
        assert_eq!(a.diagonal(), vec![-3.25, 0.25, 6.25]);
    }

    #[test]
    fn drop_tiny_prunes_but_keeps_diagonal() {
        let mut a = SparseMatrix::from_triplets(
            2,
            3,
            &[(0, 0, 1e-20), (0, 1, 1e-13), (0, 2, 2.0), (1, 0, 1e-15), (1, 1, 3.0)],
        );
        let dropped = a.drop_tiny(1e-12);
        assert_eq!(dropped, 2);
        assert_eq!(a.values().len(), a.nonzero());
        assert_eq!(a.topology().row(0), &[0, 2]);
        assert_eq!(a.topology().row(1), &[1]);
        assert_eq!(a.get(0, 0), Some(1e-20));
        assert_eq!(a.ncols(), 3);
    }

    #[test]
    fn drop_tiny_keeps_logical_diagonal_of_block_rows() {
        // sparsity row 1 holds logical rows 2 and 3
        let topology = SparseTopology::from_rows([vec![0], vec![1, 2, 3]]);
        let values = vec![1.0, 1.0, 1e-20, 1e-20, 1e-20, 1e-20, 1e-20, 1e-20];
        let mut a = SparseMatrix::<f64, 2>::from_values(topology, values, 4);
        let dropped = a.drop_tiny(1e-12);
        assert_eq!(dropped, 1);
        assert_eq!(a.topology().row(1), &[2, 3]);
        assert_eq!(a.values().len(), 2 * a.nonzero());
        assert_eq!(a.nrows(), 4);
    }

    #[test]
    fn permute_moves_values_bit_identically() {
        let a = SparseMatrix::from_triplets(
            3,
            3,
            &[(0, 0, 0.1), (0, 2, 1.0 / 3.0), (1, 1, 2.0), (2, 0, -7.5), (2, 2, 1e-300)],
        );
        let perm = [2, 0, 1];
        let p = a.permute(&perm, &perm);
        for new_i in 0..3 {
            for new_j in 0..3 {
                let old = a.get(perm[new_i], perm[new_j]);
                let new = p.get(new_i, new_j);
                assert_eq!(old.map(f64::to_bits), new.map(f64::to_bits));
            }
        }
    }

    #[test]
    fn cast_shares_topology() {
        let a = lower_example();
        let b: SparseMatrix<f32> = a.cast();
        assert!(Arc::ptr_eq(a.topology(), b.topology()));
        assert_eq!(b.get(1, 1), Some(3.0f32));
    }

    #[test]
    fn transpose_swaps_entries() {
        let a = lower_example();
        let t = a.transpose();
        assert_eq!(t.get(0, 1), Some(1.0));
        assert_eq!(t.get(1, 0), None);
        assert_eq!(t.to_dense(), a.to_dense().transpose());
    }

    #[test]
    fn assemble_rows_in_parallel() {
        let topo = SparseTopology::from_rows((0..1000).map(|i| vec![i, (i + 1) % 1000]));
        let mut a = SparseMatrix::<f64>::new(topo, 0);
        a.assemble_rows(|i, cols, vals| {
            for (v, &j) in vals.iter_mut().zip(cols) {
                *v = if j == i { 2.0 } else { -1.0 };
            }
        });
        assert_eq!(a.get(10, 10), Some(2.0));
        assert_eq!(a.get(10, 11), Some(-1.0));
        assert_eq!(a.get(999, 0), Some(-1.0));
    }

    #[test]
    fn add_element_scatters_into_pattern() {
        let topo = SparseTopology::from_rows([vec![0, 1], vec![0, 1, 2], vec![1, 2]]);
        let mut k = SparseMatrix::<f64>::new(topo, 3);
        let ke = DMatrix::from_row_slice(2, 2, &[1.0, -1.0, -1.0, 1.0]);
        assert_eq!(k.add_element(&[0, 1], &ke), 0);
        assert_eq!(k.add_element(&[1, 2], &ke), 0);
        assert_eq!(k.diagonal(), vec![1.0, 2.0, 1.0]);
        assert_eq!(k.add_element(&[0, 2], &ke), 2);
    }

    #[test]
    fn csr_interop_roundtrip() {
        let a = lower_example();
        let csr = a.to_csr().expect("valid pattern");
        assert_eq!(csr.nnz(), 4);
        let b = SparseMatrix::from_csr(&csr).expect("nalgebra CSR is sorted");
        assert_eq!(a, b);
    }
}
