use crate::distances::DEFAULT_BLOCK_BYTES;
use crate::distances::BlockwiseDistances;
use crate::error::MetricLearnError;
use crate::error::Result;
use ndarray::Array2;
use ndarray::ArrayView2;
use std::cmp::Ordering;
use std::fmt::Debug;

/// A k-nearest-neighbor search over a fixed set of points.
///
/// Implementations must be thread-safe: target-neighbor selection runs one
/// search per class on the rayon pool.
pub trait NeighborSearch: Debug + Send + Sync {
  /// For every row of `data`, the indices of its `k` nearest other rows.
  ///
  /// # Returns
  ///
  /// An array of shape (n_rows, k). Row `i` never contains `i` and is
  /// ordered by ascending distance. Indices are local to `data`.
  ///
  /// # Errors
  ///
  /// Fails if `data` has `k` or fewer rows.
  fn kneighbors(&self, data: ArrayView2<f64>, k: usize) -> Result<Array2<usize>>;
}

/// Exact search over blockwise squared Euclidean distances.
///
/// Ties are broken by the lower index, which makes the result independent
/// of block size and thread count.
#[derive(Debug, Clone, Copy)]
pub struct BruteForceSearch {
  pub budget_bytes: usize,
}

impl Default for BruteForceSearch {
  fn default() -> Self {
    Self {
      budget_bytes: DEFAULT_BLOCK_BYTES,
    }
  }
}

impl NeighborSearch for BruteForceSearch {
  fn kneighbors(&self, data: ArrayView2<f64>, k: usize) -> Result<Array2<usize>> {
    let n = data.nrows();
    if k == 0 || k >= n {
      return Err(MetricLearnError::invalid(
        "n_neighbors",
        format!("must be in 1..{n} for a set of {n} points, got {k}"),
      ));
    }

    let mut result = Array2::<usize>::zeros((n, k));
    let mut candidates: Vec<(f64, usize)> = Vec::with_capacity(n);

    BlockwiseDistances::builder()
      .a(data)
      .b(data)
      .budget_bytes(self.budget_bytes)
      .build()
      .for_each_block(|offset, block| {
        for (r, row) in block.outer_iter().enumerate() {
          let i = offset + r;
          candidates.clear();
          candidates.extend(
            row
              .iter()
              .enumerate()
              .filter(|&(j, _)| j != i)
              .map(|(j, &d)| (d, j)),
          );
          // Only the k smallest need to be in order
          candidates.select_nth_unstable_by(k - 1, compare_candidates);
          candidates[..k].sort_unstable_by(compare_candidates);
          for (slot, &(_, j)) in candidates[..k].iter().enumerate() {
            result[(i, slot)] = j;
          }
        }
      });

    Ok(result)
  }
}

fn compare_candidates(a: &(f64, usize), b: &(f64, usize)) -> Ordering {
  a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn returns_nearest_other_points_in_order() {
    let data = array![[0.0], [10.0], [1.0], [3.0], [11.5]];
    let neighbors = BruteForceSearch::default().kneighbors(data.view(), 2).unwrap();
    assert_eq!(neighbors.row(0).to_vec(), vec![2, 3]);
    assert_eq!(neighbors.row(1).to_vec(), vec![4, 3]);
    assert_eq!(neighbors.row(2).to_vec(), vec![0, 3]);
    assert_eq!(neighbors.row(4).to_vec(), vec![1, 3]);
  }

  #[test]
  fn ties_break_towards_lower_index() {
    let data = array![[0.0], [1.0], [-1.0], [2.0]];
    let neighbors = BruteForceSearch { budget_bytes: 8 }
      .kneighbors(data.view(), 2)
      .unwrap();
    assert_eq!(neighbors.row(0).to_vec(), vec![1, 2]);
  }

  #[test]
  fn rejects_k_not_below_point_count() {
    let data = array![[0.0], [1.0]];
    assert!(BruteForceSearch::default().kneighbors(data.view(), 2).is_err());
    assert!(BruteForceSearch::default().kneighbors(data.view(), 0).is_err());
  }
}
