use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use sprs::CsMat;

/*
  Compute X^T (D - W_sym) X, the sum over all weighted pairs of the outer
  products of their differences.

  W_sym = W + W^T and D is the diagonal matrix of the row sums of W_sym, so
  D - W_sym is the Laplacian of the graph described by `weights`. Neither
  W_sym nor the Laplacian is formed: both products are accumulated straight
  from the stored entries of `weights`. Since the result only depends on the
  symmetrized matrix, `weights` may be in either CSR or CSC storage.

  Parameters
  ----------
  x: array of shape (n_samples, n_features)
      The samples the graph is defined on.

  weights: sparse matrix of shape (n_samples, n_samples)
      Edge weights; signed weights are allowed.

  Returns
  -------
  sum_weighted_outer_diffs: array of shape (n_features, n_features)
*/
pub fn sum_weighted_outer_differences(x: ArrayView2<f64>, weights: &CsMat<f64>) -> Array2<f64> {
  let n_samples = x.nrows();
  assert_eq!(
    weights.shape(),
    (n_samples, n_samples),
    "weights must be a square matrix over the samples"
  );

  let mut degree = Array1::<f64>::zeros(n_samples);
  let mut weighted_neighbors = Array2::<f64>::zeros(x.raw_dim());
  for (outer, entries) in weights.outer_iterator().enumerate() {
    for (inner, &w) in entries.iter() {
      degree[outer] += w;
      degree[inner] += w;
      weighted_neighbors
        .row_mut(outer)
        .scaled_add(w, &x.row(inner));
      weighted_neighbors
        .row_mut(inner)
        .scaled_add(w, &x.row(outer));
    }
  }

  // (D - W_sym) X
  let laplacian_x = &x * &degree.insert_axis(Axis(1)) - &weighted_neighbors;
  x.t().dot(&laplacian_x)
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;
  use sprs::TriMat;

  #[test]
  fn matches_explicit_outer_products() {
    let x = array![[1.0, 2.0], [0.0, -1.0], [3.0, 0.5], [-2.0, 1.0]];
    let mut tri = TriMat::new((4, 4));
    tri.add_triplet(0, 1, 1.0);
    tri.add_triplet(2, 0, 2.5);
    tri.add_triplet(3, 2, -0.5);
    tri.add_triplet(1, 0, 1.0);
    let weights: CsMat<f64> = tri.to_csr();

    let mut expected = Array2::<f64>::zeros((2, 2));
    for (&w, (i, j)) in weights.iter() {
      let diff = &x.row(i) - &x.row(j);
      let outer = diff
        .view()
        .insert_axis(Axis(1))
        .dot(&diff.view().insert_axis(Axis(0)));
      expected.scaled_add(w, &outer);
    }

    let got = sum_weighted_outer_differences(x.view(), &weights);
    for (a, b) in got.iter().zip(expected.iter()) {
      assert!((a - b).abs() < 1e-12, "{a} vs {b}");
    }

    // storage order does not matter
    let got_csc = sum_weighted_outer_differences(x.view(), &weights.to_csc());
    for (a, b) in got_csc.iter().zip(expected.iter()) {
      assert!((a - b).abs() < 1e-12);
    }
  }
}
