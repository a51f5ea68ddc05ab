use crate::config::ImpostorStore;
use crate::distances::squared_euclidean;
use crate::error::Result;
use crate::lmnn::compute_push_loss;
use crate::lmnn::constants::MARGIN;
use crate::lmnn::sum_weighted_outer_differences;
use crate::lmnn::FindImpostors;
use crate::optimizer::FitState;
use crate::optimizer::Objective;
use crate::utils::reshape::flatten;
use crate::utils::reshape::unflatten;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use std::time::Instant;
use tracing::debug;
use typed_builder::TypedBuilder;

/*
  The margin objective: pull every sample towards its target neighbors and
  push differently labeled samples out of the margin around it.

  loss = sum_{i, k} ||L x_i - L x_{t(i,k)}||^2
       + sum_{k} sum_{(a, b) impostor pair} hinge(a, b, k)^2 + hinge(b, a, k)^2

  where hinge(a, b, k) = max(0, ||L x_a - L x_{t(a,k)}||^2 + 1 - ||L x_a - L x_b||^2).

  Each evaluation embeds the samples, finds the impostors of the current
  embedding, and assembles the gradient 2 L (G_pull + G_push), with G_pull
  precomputed once per fit.

  Parameters
  ----------
  x: array of shape (n_samples, n_features)

  members: list of n_classes index lists

  target_neighbors: array of shape (n_samples, n_neighbors)

  grad_static: array of shape (n_features, n_features)
      Output of compute_grad_static.

  store: ImpostorStore
      Resolved impostor storage strategy.

  max_impostors: int

  budget_bytes: int
      Memory budget for one distance block.

  state: FitState
      Random source and diagnostics of the current fit.
*/
#[derive(TypedBuilder)]
pub struct MarginObjective<'a> {
  x: ArrayView2<'a, f64>,
  members: &'a [Vec<usize>],
  target_neighbors: ArrayView2<'a, usize>,
  grad_static: ArrayView2<'a, f64>,
  store: ImpostorStore,
  max_impostors: usize,
  budget_bytes: usize,
  state: &'a mut FitState,
}

impl<'a> Objective for MarginObjective<'a> {
  fn loss_and_gradient(&mut self, params: ArrayView1<f64>) -> Result<(f64, Array1<f64>)> {
    let started = Instant::now();
    let transformation = unflatten(params, self.x.ncols())?;
    let embedded = self.x.dot(&transformation.t());

    let n_samples = self.x.nrows();
    let n_neighbors = self.target_neighbors.ncols();
    let target_distances = Array2::from_shape_fn((n_samples, n_neighbors), |(i, k)| {
      squared_euclidean(
        embedded.row(i),
        embedded.row(self.target_neighbors[(i, k)]),
      ) + MARGIN
    });

    let impostors = FindImpostors::builder()
      .embedded(embedded.view())
      .members(self.members)
      .margin_radii(target_distances.column(n_neighbors - 1))
      .store(self.store)
      .max_impostors(self.max_impostors)
      .budget_bytes(self.budget_bytes)
      .rng(&mut self.state.rng)
      .build()
      .exec();

    let push = compute_push_loss(
      self.target_neighbors,
      target_distances.view(),
      &impostors,
    );
    let grad_push = sum_weighted_outer_differences(self.x, &push.weights);

    let grad_total = &self.grad_static + &grad_push;
    let gradient = transformation.dot(&grad_total) * 2.0;

    let metric = transformation.t().dot(&transformation);
    let pull_loss = (&self.grad_static * &metric).sum();
    let loss = pull_loss + push.loss;

    self.state.n_evaluations += 1;
    self.state.last_loss = Some(loss);
    self.state.last_n_active = Some(push.n_active);
    debug!(
      evaluation = self.state.n_evaluations,
      loss,
      pull_loss,
      push_loss = push.loss,
      n_impostors = impostors.len(),
      n_active_constraints = push.n_active,
      duration_ms = started.elapsed().as_millis(),
      "margin loss evaluated"
    );

    Ok((loss, flatten(gradient.view())))
  }
}
