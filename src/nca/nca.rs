use crate::config::NcaConfig;
use crate::decomposition::Decomposition;
use crate::decomposition::EigenDecomposition;
use crate::error::Result;
use crate::initialize::validate_discriminant;
use crate::initialize::validate_init;
use crate::initialize::validate_warm_start;
use crate::initialize::InitializeTransformation;
use crate::labels::check_inputs;
use crate::labels::encode;
use crate::lmnn::lmnn::report_status;
use crate::model::FittedMetric;
use crate::model::MetricLearner;
use crate::model::TransformationObserver;
use crate::nca::same_class_mask;
use crate::nca::ProbabilisticObjective;
use crate::optimizer::FitState;
use crate::optimizer::IterationCallback;
use crate::optimizer::Lbfgs;
use crate::optimizer::Minimizer;
use crate::utils::reshape::flatten;
use crate::utils::reshape::unflatten;
use ndarray::ArrayView2;
use std::time::Instant;
use tracing::info;

/// Neighborhood components analysis.
///
/// Learns a linear map that maximizes the expected leave-one-out accuracy
/// of a stochastic nearest-neighbor classifier, where each sample picks its
/// neighbor through a softmax over negative squared distances.
///
/// Every loss evaluation materializes the full pairwise distance matrix, so
/// memory grows quadratically with the number of samples.
#[derive(Debug)]
pub struct Nca {
  config: NcaConfig,
  minimizer: Box<dyn Minimizer>,
  decomposition: Box<dyn Decomposition>,
}

impl Nca {
  pub fn new(config: NcaConfig) -> Self {
    Self {
      config,
      minimizer: Box::new(Lbfgs),
      decomposition: Box::new(EigenDecomposition),
    }
  }

  pub fn with_collaborators(
    config: NcaConfig,
    minimizer: Box<dyn Minimizer>,
    decomposition: Box<dyn Decomposition>,
  ) -> Self {
    Self {
      config,
      minimizer,
      decomposition,
    }
  }

  pub fn config(&self) -> &NcaConfig {
    &self.config
  }
}

impl MetricLearner for Nca {
  fn fit_with<L: Ord + Clone>(
    &self,
    x: ArrayView2<f64>,
    y: &[L],
    warm_start: Option<ArrayView2<f64>>,
    callback: Option<Box<dyn IterationCallback>>,
  ) -> Result<FittedMetric<L>> {
    let config = &self.config;
    let fit_started = Instant::now();

    config.validate()?;
    check_inputs(&x, y)?;
    let n_features = x.ncols();
    let n_components = match warm_start {
      Some(previous) => {
        validate_warm_start(previous, n_features)?;
        previous.nrows()
      }
      None => validate_init(&config.init, config.n_components, n_features)?,
    };
    let encoded = encode(x, y)?;
    if warm_start.is_none() {
      validate_discriminant(&config.init, n_components, encoded.n_classes())?;
    }

    info!(
      n_samples = encoded.n_samples(),
      n_features,
      n_classes = encoded.n_classes(),
      n_components,
      "starting nca fit"
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

    let mask = same_class_mask(&encoded.codes);
    let observer = TransformationObserver::new(n_features, callback);
    let outcome = {
      let mut objective = ProbabilisticObjective::builder()
        .x(encoded.x.view())
        .same_class(mask.view())
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
      "nca fit complete"
    );

    Ok(FittedMetric {
      transformation,
      classes: encoded.classes,
      n_iter: outcome.n_iter,
      status: outcome.status,
      final_loss: outcome.loss.or(state.last_loss),
      n_neighbors: None,
      n_evaluations: state.n_evaluations,
      n_active_constraints: None,
    })
  }
}
