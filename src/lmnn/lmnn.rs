use crate::config::LmnnConfig;
use crate::decomposition::Decomposition;
use crate::decomposition::EigenDecomposition;
use crate::error::MetricLearnError;
use crate::error::Result;
use crate::initialize::validate_discriminant;
use crate::initialize::validate_init;
use crate::initialize::validate_warm_start;
use crate::initialize::InitializeTransformation;
use crate::labels::check_inputs;
use crate::labels::encode_without_singletons;
use crate::lmnn::compute_grad_static;
use crate::lmnn::MarginObjective;
use crate::lmnn::SelectTargetNeighbors;
use crate::model::FittedMetric;
use crate::model::MetricLearner;
use crate::model::TransformationObserver;
use crate::neighbors::BruteForceSearch;
use crate::neighbors::NeighborSearch;
use crate::optimizer::FitState;
use crate::optimizer::IterationCallback;
use crate::optimizer::Lbfgs;
use crate::optimizer::Minimizer;
use crate::optimizer::OptimizationStatus;
use crate::utils::reshape::flatten;
use crate::utils::reshape::unflatten;
use ndarray::ArrayView2;
use std::time::Instant;
use tracing::info;
use tracing::warn;

/// Large margin nearest neighbor metric learning.
///
/// Learns a linear map under which every sample's `n_neighbors` nearest
/// same-class samples (its target neighbors) are closer than any sample of
/// another class, by a margin of one unit of squared distance. Samples of
/// other classes that violate the margin are called impostors.
///
/// The learner holds only configuration and collaborators, so it can be
/// reused across datasets.
///
/// # Example
///
/// ```ignore
/// use metric_learn::{Lmnn, LmnnConfig, MetricLearner};
///
/// let lmnn = Lmnn::new(LmnnConfig {
///     n_neighbors: 3,
///     random_state: Some(0),
///     ..Default::default()
/// });
/// let fitted = lmnn.fit(x.view(), &y)?;
/// let embedded = fitted.embed(x.view())?;
/// ```
#[derive(Debug)]
pub struct Lmnn {
  config: LmnnConfig,
  search: Box<dyn NeighborSearch>,
  minimizer: Box<dyn Minimizer>,
  decomposition: Box<dyn Decomposition>,
}

impl Lmnn {
  /// Create a learner with exact neighbor search, L-BFGS and
  /// eigendecomposition-based initialization.
  pub fn new(config: LmnnConfig) -> Self {
    let search = BruteForceSearch {
      budget_bytes: config.block_size_bytes(),
    };
    Self {
      config,
      search: Box::new(search),
      minimizer: Box::new(Lbfgs),
      decomposition: Box::new(EigenDecomposition),
    }
  }

  /// Create a learner with custom collaborators.
  ///
  /// # Arguments
  ///
  /// * `config` - Hyperparameters
  /// * `search` - k-nearest-neighbor search used within each class
  /// * `minimizer` - Numerical minimizer driving the optimization
  /// * `decomposition` - Provider of PCA / LDA initializations
  pub fn with_collaborators(
    config: LmnnConfig,
    search: Box<dyn NeighborSearch>,
    minimizer: Box<dyn Minimizer>,
    decomposition: Box<dyn Decomposition>,
  ) -> Self {
    Self {
      config,
      search,
      minimizer,
      decomposition,
    }
  }

  pub fn config(&self) -> &LmnnConfig {
    &self.config
  }
}

impl MetricLearner for Lmnn {
  fn fit_with<L: Ord + Clone>(
    &self,
    x: ArrayView2<f64>,
    y: &[L],
    warm_start: Option<ArrayView2<f64>>,
    callback: Option<Box<dyn IterationCallback>>,
  ) -> Result<FittedMetric<L>> {
    let config = &self.config;
    let fit_started = Instant::now();

    // Validate everything before doing any work
    config.validate()?;
    check_inputs(&x, y)?;
    if config.n_neighbors > x.nrows() - 1 {
      return Err(MetricLearnError::invalid(
        "n_neighbors",
        format!(
          "must be <= n_samples - 1 = {}, got {}",
          x.nrows() - 1,
          config.n_neighbors
        ),
      ));
    }
    let n_features = x.ncols();
    let n_components = match warm_start {
      Some(previous) => {
        validate_warm_start(previous, n_features)?;
        previous.nrows()
      }
      None => validate_init(&config.init, config.n_components, n_features)?,
    };

    let encoded = encode_without_singletons(x, y)?;
    let n_samples = encoded.n_samples();
    if warm_start.is_none() {
      validate_discriminant(&config.init, n_components, encoded.n_classes())?;
    }

    let max_neighbors = encoded.min_class_size() - 1;
    let n_neighbors = if config.n_neighbors > max_neighbors {
      warn!(
        requested = config.n_neighbors,
        used = max_neighbors,
        "n_neighbors exceeds the size of the smallest class minus one and has been reduced"
      );
      max_neighbors
    } else {
      config.n_neighbors
    };

    info!(
      n_samples,
      n_features,
      n_classes = encoded.n_classes(),
      n_components,
      n_neighbors,
      "starting lmnn fit"
    );

    let mut state = FitState::new(config.random_state);

    let transformation = match warm_start {
      Some(previous) => previous.to_owned(),
      None => InitializeTransformation::builder()
        .init(&config.init)
        .n_components(n_components)
        .x(encoded.x.view())
        .codes(&encoded.codes)
        .n_classes(encoded.n_classes())
        .rng(&mut state.rng)
        .decomposition(self.decomposition.as_ref())
        .build()
        .exec()?,
    };

    let target_neighbors = SelectTargetNeighbors::builder()
      .x(encoded.x.view())
      .members(&encoded.members)
      .n_neighbors(n_neighbors)
      .search(self.search.as_ref())
      .build()
      .exec()?;

    let grad_static = compute_grad_static(encoded.x.view(), target_neighbors.view());

    let store = config.impostor_store.resolve(n_samples);
    let observer = TransformationObserver::new(n_features, callback);
    let outcome = {
      let mut objective = MarginObjective::builder()
        .x(encoded.x.view())
        .members(&encoded.members)
        .target_neighbors(target_neighbors.view())
        .grad_static(grad_static.view())
        .store(store)
        .max_impostors(config.max_impostors)
        .budget_bytes(config.block_size_bytes())
        .state(&mut state)
        .build();
      self.minimizer.minimize(
        &mut objective,
        flatten(transformation.view()),
        &config.optimization,
        Box::new(observer),
      )?
    };

    let transformation = unflatten(outcome.params.view(), n_features)?;
    report_status(&outcome.status, outcome.n_iter);
    info!(
      duration_ms = fit_started.elapsed().as_millis(),
      n_iter = outcome.n_iter,
      n_evaluations = state.n_evaluations,
      "lmnn fit complete"
    );

    Ok(FittedMetric {
      transformation,
      classes: encoded.classes,
      n_iter: outcome.n_iter,
      status: outcome.status,
      final_loss: outcome.loss.or(state.last_loss),
      n_neighbors: Some(n_neighbors),
      n_evaluations: state.n_evaluations,
      n_active_constraints: state.last_n_active,
    })
  }
}

/// Warn about runs that did not end at a converged point. The
/// transformation is returned either way.
pub(crate) fn report_status(status: &OptimizationStatus, n_iter: usize) {
  match status {
    OptimizationStatus::MaxItersReached => {
      warn!(n_iter, "optimizer did not converge within the iteration budget")
    }
    OptimizationStatus::Failed { reason } => {
      warn!(n_iter, reason = reason.as_str(), "optimizer stopped without converging")
    }
    OptimizationStatus::Converged | OptimizationStatus::StoppedByCallback => {}
  }
}
