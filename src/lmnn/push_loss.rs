use crate::lmnn::Impostors;
use ndarray::ArrayView2;
use sprs::CsMat;
use sprs::TriMat;

/// Hinge loss of all impostor pairs, with the weights of its gradient.
#[derive(Debug, Clone)]
pub struct PushLoss {
  /// Sum over ranks and pairs of the squared hinge violations.
  pub loss: f64,
  /// Signed pair weights; feeding them through
  /// [`sum_weighted_outer_differences`](super::sum_weighted_outer_differences)
  /// yields half the gradient of `loss` with respect to L^T L.
  pub weights: CsMat<f64>,
  /// Number of (pair, rank) combinations with a positive violation.
  pub n_active: usize,
}

/*
  Compute the push term of the margin loss.

  For every target rank k and every impostor pair (a, b), both directions
  are checked: a is pushed away from b when b comes closer to a than a's
  k-th target neighbor (plus margin), and vice versa. A violation of size v
  adds v^2 to the loss, a weight of -2v on the pair, and +2v on the
  (sample, k-th target neighbor) entry of the violated sample.

  Ranks are processed from the last to the first. Entries are summed
  whenever the same coordinate is hit twice, so the result does not depend
  on the processing order.

  Parameters
  ----------
  target_neighbors: array of shape (n_samples, n_neighbors)

  target_distances: array of shape (n_samples, n_neighbors)
      Squared distance to each target neighbor plus the margin.

  impostors: Impostors
      Pairs with their current squared distances.
*/
pub fn compute_push_loss(
  target_neighbors: ArrayView2<usize>,
  target_distances: ArrayView2<f64>,
  impostors: &Impostors,
) -> PushLoss {
  let n_samples = target_distances.nrows();
  let n_neighbors = target_distances.ncols();

  let mut tri = TriMat::new((n_samples, n_samples));
  let mut loss = 0.0;
  let mut n_active = 0;
  let mut pulled = vec![0.0; n_samples];

  for rank in (0..n_neighbors).rev() {
    pulled.iter_mut().for_each(|v| *v = 0.0);

    for ((&a, &b), &d) in impostors
      .rows
      .iter()
      .zip(impostors.cols.iter())
      .zip(impostors.distances.iter())
    {
      let violation_a = (target_distances[(a, rank)] - d).max(0.0);
      if violation_a > 0.0 {
        n_active += 1;
        loss += violation_a * violation_a;
        tri.add_triplet(a, b, -2.0 * violation_a);
        pulled[a] += 2.0 * violation_a;
      }

      let violation_b = (target_distances[(b, rank)] - d).max(0.0);
      if violation_b > 0.0 {
        n_active += 1;
        loss += violation_b * violation_b;
        tri.add_triplet(a, b, -2.0 * violation_b);
        pulled[b] += 2.0 * violation_b;
      }
    }

    for (i, &w) in pulled.iter().enumerate() {
      if w != 0.0 {
        tri.add_triplet(i, target_neighbors[(i, rank)], w);
      }
    }
  }

  PushLoss {
    loss,
    weights: tri.to_csr(),
    n_active,
  }
}
