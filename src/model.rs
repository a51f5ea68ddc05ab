use crate::error::MetricLearnError;
use crate::error::Result;
use crate::optimizer::IterationCallback;
use crate::optimizer::OptimizationStatus;
use crate::optimizer::StepObserver;
use crate::utils::reshape::unflatten;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use serde::Deserialize;
use serde::Serialize;
use std::ops::ControlFlow;
use tracing::debug;

/// Common interface of the metric learners.
///
/// Implementors only provide [`MetricLearner::fit_with`]; the other entry
/// points are shorthands for it.
pub trait MetricLearner {
  /// Learn a transformation from `x` and its labels `y`.
  ///
  /// # Arguments
  ///
  /// * `x` - Training samples (n_samples × n_features)
  /// * `y` - One label per sample
  /// * `warm_start` - A previously learned transformation to start from. It
  ///   replaces the configured initialization and output dimensionality.
  /// * `callback` - Invoked after every optimizer iteration with the current
  ///   transformation
  ///
  /// # Errors
  ///
  /// Invalid parameters, too few classes, or shapes that do not fit
  /// together. All of these are detected before optimization starts.
  fn fit_with<L: Ord + Clone>(
    &self,
    x: ArrayView2<f64>,
    y: &[L],
    warm_start: Option<ArrayView2<f64>>,
    callback: Option<Box<dyn IterationCallback>>,
  ) -> Result<FittedMetric<L>>;

  fn fit<L: Ord + Clone>(&self, x: ArrayView2<f64>, y: &[L]) -> Result<FittedMetric<L>> {
    self.fit_with(x, y, None, None)
  }

  /// Fit while reporting progress to `callback`, which may stop the
  /// optimization early by returning `ControlFlow::Break(())`.
  ///
  /// # Example
  ///
  /// ```ignore
  /// let fitted = Lmnn::new(config).fit_with_callback(x.view(), &y, |t, n_iter| {
  ///     println!("iteration {n_iter}: {:?}", t.dim());
  ///     ControlFlow::Continue(())
  /// })?;
  /// ```
  fn fit_with_callback<L, F>(
    &self,
    x: ArrayView2<f64>,
    y: &[L],
    callback: F,
  ) -> Result<FittedMetric<L>>
  where
    L: Ord + Clone,
    F: FnMut(ArrayView2<f64>, usize) -> ControlFlow<()> + Send + 'static,
  {
    self.fit_with(x, y, None, Some(Box::new(callback)))
  }

  /// Continue from the transformation of `previous`.
  ///
  /// Fails with [`MetricLearnError::ShapeMismatch`] if `x` does not have
  /// the number of features `previous` was fitted on.
  fn fit_from<L: Ord + Clone>(
    &self,
    previous: &FittedMetric<L>,
    x: ArrayView2<f64>,
    y: &[L],
  ) -> Result<FittedMetric<L>> {
    self.fit_with(x, y, Some(previous.transformation()), None)
  }
}

/// A learned linear transformation and the record of how it was obtained.
///
/// The transformation is returned even when the optimizer did not converge;
/// check [`FittedMetric::converged`] or [`FittedMetric::status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedMetric<L> {
  pub(crate) transformation: Array2<f64>,
  pub(crate) classes: Vec<L>,
  pub(crate) n_iter: usize,
  pub(crate) status: OptimizationStatus,
  pub(crate) final_loss: Option<f64>,
  pub(crate) n_neighbors: Option<usize>,
  pub(crate) n_evaluations: usize,
  pub(crate) n_active_constraints: Option<usize>,
}

impl<L> FittedMetric<L> {
  /// The learned transformation (n_components × n_features).
  pub fn transformation(&self) -> ArrayView2<f64> {
    self.transformation.view()
  }

  pub fn into_transformation(self) -> Array2<f64> {
    self.transformation
  }

  pub fn n_components(&self) -> usize {
    self.transformation.nrows()
  }

  pub fn n_features_in(&self) -> usize {
    self.transformation.ncols()
  }

  /// Map `x` (n × n_features) to the learned space (n × n_components).
  pub fn embed(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
    if x.ncols() != self.n_features_in() {
      return Err(MetricLearnError::ShapeMismatch(format!(
        "x has {} features, but the transformation expects {}",
        x.ncols(),
        self.n_features_in()
      )));
    }
    Ok(x.dot(&self.transformation.t()))
  }

  /// Number of completed optimizer iterations.
  pub fn n_iter(&self) -> usize {
    self.n_iter
  }

  pub fn status(&self) -> &OptimizationStatus {
    &self.status
  }

  pub fn converged(&self) -> bool {
    self.status.is_converged()
  }

  /// Loss at the returned transformation, when the optimizer reported it.
  pub fn final_loss(&self) -> Option<f64> {
    self.final_loss
  }

  /// Number of target neighbors actually used. `None` for the
  /// probabilistic method.
  pub fn n_neighbors(&self) -> Option<usize> {
    self.n_neighbors
  }

  /// Labels of the classes the transformation was trained on, in sorted
  /// order. Singleton classes dropped by the margin method are absent.
  pub fn classes(&self) -> &[L] {
    &self.classes
  }

  /// Number of loss/gradient evaluations.
  pub fn n_evaluations(&self) -> usize {
    self.n_evaluations
  }

  /// Active margin constraints at the last evaluation. `None` for the
  /// probabilistic method.
  pub fn n_active_constraints(&self) -> Option<usize> {
    self.n_active_constraints
  }
}

/// Reshapes the optimizer's flat parameters and hands them to the user
/// callback.
pub(crate) struct TransformationObserver {
  n_features: usize,
  callback: Option<Box<dyn IterationCallback>>,
}

impl TransformationObserver {
  pub(crate) fn new(n_features: usize, callback: Option<Box<dyn IterationCallback>>) -> Self {
    Self {
      n_features,
      callback,
    }
  }
}

impl StepObserver for TransformationObserver {
  fn after_iteration(&mut self, params: ArrayView1<f64>, n_iter: usize) -> ControlFlow<()> {
    debug!(n_iter, "iteration complete");
    let Some(callback) = self.callback.as_mut() else {
      return ControlFlow::Continue(());
    };
    match unflatten(params, self.n_features) {
      Ok(transformation) => callback.on_iteration(transformation.view(), n_iter),
      Err(_) => ControlFlow::Continue(()),
    }
  }
}
