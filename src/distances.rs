use ndarray::linalg::general_mat_mul;
use ndarray::s;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::ArrayViewMut2;
use ndarray::Axis;
use rayon::prelude::*;
use typed_builder::TypedBuilder;

/// Default memory budget for one distance block (8 MiB).
pub const DEFAULT_BLOCK_BYTES: usize = 8 * 1024 * 1024;

/// Squared Euclidean distance between two vectors.
#[inline(always)]
pub fn squared_euclidean(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
  x.iter()
    .zip(y.iter())
    .map(|(a, b)| {
      let diff = a - b;
      diff * diff
    })
    .sum()
}

/// Squared L2 norm of every row.
pub fn squared_row_norms(x: ArrayView2<f64>) -> Array1<f64> {
  x.outer_iter().map(|row| row.dot(&row)).collect()
}

/// Number of rows whose distances against `n_cols` columns fit in `budget_bytes`.
///
/// Always at least one, so that a tiny budget degrades to row-at-a-time
/// processing instead of stalling.
pub fn block_n_rows(n_cols: usize, budget_bytes: usize) -> usize {
  let bytes_per_row = n_cols.max(1) * std::mem::size_of::<f64>();
  (budget_bytes / bytes_per_row).max(1)
}

/*
  Squared Euclidean distances between the rows of `a` and the rows of `b`,
  computed block by block so that no more than `budget_bytes` of distances
  are alive at once.

  Each block uses the expansion ||x - y||^2 = ||x||^2 + ||y||^2 - 2 x.y. The
  squared norms of `b` are computed once and shared by every block.

  Block values are NOT clipped: cancellation can leave tiny negative numbers
  where the true distance is zero. Consumers that compare against strictly
  positive thresholds can use them as-is; consumers that need non-negative
  values must clip.

  Parameters
  ----------
  a: array of shape (n_a, n_features)
      Rows that are split into blocks.

  b: array of shape (n_b, n_features)
      Rows every block is compared against in full.

  budget_bytes: int (optional, default 8 MiB)
      Memory budget for a single (rows, n_b) block.
*/
#[derive(TypedBuilder, Debug)]
pub struct BlockwiseDistances<'a> {
  a: ArrayView2<'a, f64>,
  b: ArrayView2<'a, f64>,
  #[builder(default = DEFAULT_BLOCK_BYTES)]
  budget_bytes: usize,
}

impl<'a> BlockwiseDistances<'a> {
  /// Rows of `a` processed per block.
  pub fn block_rows(&self) -> usize {
    block_n_rows(self.b.nrows(), self.budget_bytes)
  }

  /// Visit every block in order as `(row_offset, distances)`.
  ///
  /// `distances` has shape (rows_in_block, n_b) and row `r` belongs to row
  /// `row_offset + r` of `a`.
  pub fn for_each_block<F>(&self, mut visit: F)
  where
    F: FnMut(usize, Array2<f64>),
  {
    let n_a = self.a.nrows();
    if n_a == 0 || self.b.nrows() == 0 {
      return;
    }
    let b_norms = squared_row_norms(self.b);
    let rows = self.block_rows();

    let mut start = 0;
    while start < n_a {
      let end = (start + rows).min(n_a);
      let a_block = self.a.slice(s![start..end, ..]);
      let mut block = Array2::<f64>::zeros((end - start, self.b.nrows()));
      fill_block(a_block, self.b, &b_norms.view(), &mut block.view_mut());
      visit(start, block);
      start = end;
    }
  }

  /// Assemble the full (n_a, n_b) matrix, computing blocks in parallel.
  ///
  /// Each block writes to a disjoint band of rows of the output.
  pub fn exec(self, clip: bool) -> Array2<f64> {
    let n_a = self.a.nrows();
    let n_b = self.b.nrows();
    let mut out = Array2::<f64>::zeros((n_a, n_b));
    if n_a == 0 || n_b == 0 {
      return out;
    }

    let b_norms = squared_row_norms(self.b);
    let rows = self.block_rows();
    let a = self.a;
    let b = self.b;

    // `zeros` is always in standard layout, so the buffer is contiguous
    if let Some(buffer) = out.as_slice_mut() {
      buffer
        .par_chunks_mut(rows * n_b)
        .enumerate()
        .for_each(|(block_no, chunk)| {
          let start = block_no * rows;
          let n_rows = chunk.len() / n_b;
          let a_block = a.slice(s![start..start + n_rows, ..]);
          let mut view = ArrayViewMut2::from_shape((n_rows, n_b), chunk)
            .expect("chunk length is a whole number of rows");
          fill_block(a_block, b, &b_norms.view(), &mut view);
          if clip {
            view.mapv_inplace(|d| d.max(0.0));
          }
        });
    }

    out
  }
}

fn fill_block(
  a_block: ArrayView2<f64>,
  b: ArrayView2<f64>,
  b_norms: &ArrayView1<f64>,
  out: &mut ArrayViewMut2<f64>,
) {
  general_mat_mul(-2.0, &a_block, &b.t(), 0.0, out);
  let a_norms = squared_row_norms(a_block);
  *out += &a_norms.insert_axis(Axis(1));
  *out += &b_norms.view().insert_axis(Axis(0));
}

/// Squared distances between all rows of `x`, clipped at zero and with an
/// exactly zero diagonal.
pub fn self_squared_distances(x: ArrayView2<f64>, budget_bytes: usize) -> Array2<f64> {
  let mut distances = BlockwiseDistances::builder()
    .a(x)
    .b(x)
    .budget_bytes(budget_bytes)
    .build()
    .exec(true);
  distances.diag_mut().fill(0.0);
  distances
}

/// Squared distances between the pairs `(x[ind_a[i]], x[ind_b[i]])`.
///
/// Pairs are processed in batches sized so that one batch of gathered rows
/// fits the budget. Values are computed from differences, so they are
/// never negative.
pub fn paired_squared_distances(
  x: ArrayView2<f64>,
  ind_a: &[usize],
  ind_b: &[usize],
  budget_bytes: usize,
) -> Array1<f64> {
  assert_eq!(ind_a.len(), ind_b.len(), "paired index lists must have equal length");
  let batch = block_n_rows(x.ncols(), budget_bytes);

  let distances: Vec<f64> = ind_a
    .par_chunks(batch)
    .zip(ind_b.par_chunks(batch))
    .flat_map_iter(|(chunk_a, chunk_b)| {
      chunk_a
        .iter()
        .zip(chunk_b.iter())
        .map(|(&i, &j)| squared_euclidean(x.row(i), x.row(j)))
        .collect::<Vec<_>>()
    })
    .collect();

  Array1::from(distances)
}
