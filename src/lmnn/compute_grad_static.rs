use crate::lmnn::sum_weighted_outer_differences;
use ndarray::Array2;
use ndarray::ArrayView2;
use sprs::CsMat;
use sprs::TriMat;
use std::time::Instant;
use tracing::info;

/*
  Gradient of the pull loss with respect to L^T L.

  Every (sample, target neighbor) edge gets unit weight. Since the pull loss
  is linear in L^T L, this term is the same at every iteration and is
  computed once per fit.

  Parameters
  ----------
  x: array of shape (n_samples, n_features)

  target_neighbors: array of shape (n_samples, n_neighbors)

  Returns
  -------
  grad_static: array of shape (n_features, n_features)
      Symmetric.
*/
pub fn compute_grad_static(x: ArrayView2<f64>, target_neighbors: ArrayView2<usize>) -> Array2<f64> {
  let started = Instant::now();
  let n_samples = x.nrows();

  let mut tri = TriMat::with_capacity((n_samples, n_samples), target_neighbors.len());
  for (i, neighbors) in target_neighbors.outer_iter().enumerate() {
    for &j in neighbors.iter() {
      tri.add_triplet(i, j, 1.0);
    }
  }
  let weights: CsMat<f64> = tri.to_csr();
  let grad_static = sum_weighted_outer_differences(x, &weights);

  info!(
    duration_ms = started.elapsed().as_millis(),
    n_edges = weights.nnz(),
    "static gradient complete"
  );

  grad_static
}
