//! Sparsity pattern shared by value containers.
//!
//! A [`SparseTopology`] stores only the compressed-row structure: a row
//! offset array of length `nrows + 1` and a flat column index array. Column
//! indices inside a row are sorted and unique once the topology is closed.
//! Numeric values live in [`SparseMatrix`](crate::SparseMatrix), which holds
//! the topology behind an `Arc` so several matrices can share one pattern.

use std::collections::VecDeque;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Row offsets must start at zero and be non-decreasing")]
    InvalidOffsets,

    #[error("Offsets end at {offsets} but {indices} column indices were supplied")]
    LengthMismatch { offsets: usize, indices: usize },

    #[error("Row {row} is not sorted or contains duplicate column indices")]
    UnsortedRow { row: usize },

    #[error("Row index {row} out of range (nrows {nrows})")]
    RowOutOfRange { row: usize, nrows: usize },
}

/// Compressed sparse row pattern without values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseTopology {
    offsets: Vec<usize>,
    indices: Vec<usize>,
}

impl Default for SparseTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseTopology {
    /// Empty pattern with zero rows.
    pub fn new() -> Self {
        Self {
            offsets: vec![0],
            indices: Vec::new(),
        }
    }

    pub fn with_capacity(nrows: usize, nonzero: usize) -> Self {
        let mut offsets = Vec::with_capacity(nrows + 1);
        offsets.push(0);
        Self {
            offsets,
            indices: Vec::with_capacity(nonzero),
        }
    }

    /// Build a closed pattern from per-row column lists.
    ///
    /// Rows may arrive unsorted and with duplicates; each row is sorted and
    /// deduplicated here.
    pub fn from_rows<I, R>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[usize]>,
    {
        let mut topo = Self::new();
        let mut scratch = Vec::new();
        for row in rows {
            scratch.clear();
            scratch.extend_from_slice(row.as_ref());
            scratch.sort_unstable();
            scratch.dedup();
            topo.append_row(&scratch);
        }
        topo
    }

    /// Adopt raw compressed arrays after validating them.
    pub fn from_parts(offsets: Vec<usize>, indices: Vec<usize>) -> Result<Self, PatternError> {
        if offsets.first() != Some(&0) || offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(PatternError::InvalidOffsets);
        }
        let end = offsets[offsets.len() - 1];
        if end != indices.len() {
            return Err(PatternError::LengthMismatch {
                offsets: end,
                indices: indices.len(),
            });
        }
        for (row, w) in offsets.windows(2).enumerate() {
            if !is_sorted_unique(&indices[w[0]..w[1]]) {
                return Err(PatternError::UnsortedRow { row });
            }
        }
        Ok(Self { offsets, indices })
    }

    /// Append one row. The caller guarantees sorted, unique column indices.
    pub fn append_row(&mut self, cols: &[usize]) {
        debug_assert!(
            is_sorted_unique(cols),
            "append_row requires sorted, unique column indices"
        );
        self.indices.extend_from_slice(cols);
        self.offsets.push(self.indices.len());
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Number of stored entries.
    #[inline]
    pub fn nonzero(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn row_range(&self, row: usize) -> Range<usize> {
        self.offsets[row]..self.offsets[row + 1]
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[usize] {
        &self.indices[self.row_range(row)]
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Position of entry `(row, col)` in the flat index array.
    #[inline]
    pub fn lookup(&self, row: usize, col: usize) -> Option<usize> {
        let range = self.row_range(row);
        let start = range.start;
        self.indices[range].binary_search(&col).ok().map(|k| start + k)
    }

    pub fn max_column(&self) -> Option<usize> {
        (0..self.nrows()).filter_map(|i| self.row(i).last().copied()).max()
    }

    /// Position of the diagonal entry of each row, if stored.
    pub fn diagonal_positions(&self) -> Vec<Option<usize>> {
        (0..self.nrows()).map(|i| self.lookup(i, i)).collect()
    }

    /// Transposed pattern with `ncols` rows.
    ///
    /// The returned map gives, for every entry of the transpose, the
    /// position of the same entry in `self`.
    pub fn transpose(&self, ncols: usize) -> (Self, Vec<usize>) {
        let mut counts = vec![0usize; ncols + 1];
        for &j in &self.indices {
            debug_assert!(j < ncols, "column {} exceeds ncols {}", j, ncols);
            counts[j + 1] += 1;
        }
        for j in 0..ncols {
            counts[j + 1] += counts[j];
        }
        let offsets = counts.clone();
        let mut next = counts;
        let mut indices = vec![0usize; self.nonzero()];
        let mut map = vec![0usize; self.nonzero()];
        for i in 0..self.nrows() {
            for p in self.row_range(i) {
                let j = self.indices[p];
                let q = next[j];
                indices[q] = i;
                map[q] = p;
                next[j] += 1;
            }
        }
        (Self { offsets, indices }, map)
    }

    /// Pattern with rows and columns reordered.
    ///
    /// Both permutations use the `perm[new] = old` convention. The returned
    /// gather map lists, for each entry of the new pattern, the position of
    /// the source entry in `self`.
    pub fn permuted(&self, row_perm: &[usize], col_perm: &[usize]) -> (Self, Vec<usize>) {
        debug_assert_eq!(row_perm.len(), self.nrows());
        let inv_col = invert_permutation(col_perm);
        let mut topo = Self::with_capacity(self.nrows(), self.nonzero());
        let mut map = Vec::with_capacity(self.nonzero());
        let mut entries: Vec<(usize, usize)> = Vec::new();
        let mut cols = Vec::new();
        for &old_row in row_perm {
            entries.clear();
            entries.extend(
                self.row_range(old_row)
                    .map(|p| (inv_col[self.indices[p]], p)),
            );
            entries.sort_unstable_by_key(|&(c, _)| c);
            cols.clear();
            cols.extend(entries.iter().map(|&(c, _)| c));
            map.extend(entries.iter().map(|&(_, p)| p));
            topo.append_row(&cols);
        }
        (topo, map)
    }

    /// Reverse Cuthill-McKee ordering of a square pattern.
    ///
    /// Works on the graph of `A + Aᵀ`, so unsymmetric patterns are accepted.
    /// Each connected component starts from its lowest-degree vertex.
    /// Returns `perm` with `perm[new] = old`.
    pub fn reverse_cuthill_mckee(&self) -> Vec<usize> {
        let n = self.nrows();
        let (transposed, _) = self.transpose(n);

        let neighbors = |i: usize| {
            self.row(i)
                .iter()
                .chain(transposed.row(i).iter())
                .copied()
                .filter(move |&j| j != i && j < n)
        };

        let degree: Vec<usize> = (0..n)
            .map(|i| {
                let mut adj: Vec<usize> = neighbors(i).collect();
                adj.sort_unstable();
                adj.dedup();
                adj.len()
            })
            .collect();

        let mut candidates: Vec<usize> = (0..n).collect();
        candidates.sort_by_key(|&i| (degree[i], i));

        let mut visited = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let mut queue = VecDeque::new();
        let mut adj = Vec::new();

        for &start in &candidates {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            queue.push_back(start);
            while let Some(node) = queue.pop_front() {
                order.push(node);
                adj.clear();
                adj.extend(neighbors(node).filter(|&j| !visited[j]));
                adj.sort_unstable_by_key(|&j| (degree[j], j));
                adj.dedup();
                for &j in &adj {
                    visited[j] = true;
                    queue.push_back(j);
                }
            }
        }

        order.reverse();
        order
    }
}

/// Inverse of a `perm[new] = old` permutation.
pub fn invert_permutation(perm: &[usize]) -> Vec<usize> {
    let mut inv = vec![0usize; perm.len()];
    for (new, &old) in perm.iter().enumerate() {
        inv[old] = new;
    }
    inv
}

fn is_sorted_unique(cols: &[usize]) -> bool {
    cols.windows(2).all(|w| w[0] < w[1])
}
