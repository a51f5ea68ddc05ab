use crate::distances::self_squared_distances;
use crate::distances::DEFAULT_BLOCK_BYTES;
use crate::error::Result;
use crate::optimizer::FitState;
use crate::optimizer::Objective;
use crate::utils::reshape::flatten;
use crate::utils::reshape::unflatten;
use ndarray::Array1;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;
use ndarray::Zip;
use std::time::Instant;
use tracing::debug;
use typed_builder::TypedBuilder;

/*
  The probabilistic objective: the expected number of samples whose
  stochastic nearest neighbor has the same class, negated for minimization.

  Sample i picks j != i as its neighbor with probability
  p_ij = softmax_j(-||L x_i - L x_j||^2), and retains its class with
  p_i = sum_{j same class} p_ij. The loss is -sum_i p_i.

  Unlike the margin objective, the full (n_samples, n_samples) matrix of
  probabilities is held in memory.

  Parameters
  ----------
  x: array of shape (n_samples, n_features)

  same_class: boolean array of shape (n_samples, n_samples)

  state: FitState
      Diagnostics of the current fit.
*/
#[derive(TypedBuilder)]
pub struct ProbabilisticObjective<'a> {
  x: ArrayView2<'a, f64>,
  same_class: ArrayView2<'a, bool>,
  state: &'a mut FitState,
}

impl<'a> Objective for ProbabilisticObjective<'a> {
  fn loss_and_gradient(&mut self, params: ArrayView1<f64>) -> Result<(f64, Array1<f64>)> {
    let started = Instant::now();
    let transformation = unflatten(params, self.x.ncols())?;
    let embedded = self.x.dot(&transformation.t());

    let mut p = self_squared_distances(embedded.view(), DEFAULT_BLOCK_BYTES);
    p.diag_mut().fill(f64::INFINITY);
    for mut row in p.outer_iter_mut() {
      // shift by the smallest distance, the largest logit
      let nearest = row.iter().copied().fold(f64::INFINITY, f64::min);
      row.mapv_inplace(|d| (nearest - d).exp());
      let total = row.sum();
      row /= total;
    }

    let mut masked = p.clone();
    Zip::from(&mut masked)
      .and(&self.same_class)
      .for_each(|v, &same| {
        if !same {
          *v = 0.0;
        }
      });
    let retention = masked.sum_axis(Axis(1));
    let loss = retention.sum();

    let weighted = &masked - &(&p * &retention.view().insert_axis(Axis(1)));
    let mut symmetric = &weighted + &weighted.t();
    symmetric
      .diag_mut()
      .assign(&weighted.sum_axis(Axis(0)).mapv(|v| -v));
    let gradient = embedded.t().dot(&symmetric).dot(&self.x) * -2.0;

    self.state.n_evaluations += 1;
    self.state.last_loss = Some(-loss);
    debug!(
      evaluation = self.state.n_evaluations,
      loss = -loss,
      duration_ms = started.elapsed().as_millis(),
      "probabilistic loss evaluated"
    );

    Ok((-loss, flatten(gradient.view())))
  }
}
