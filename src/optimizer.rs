use crate::config::OptimizationParams;
use crate::error::MetricLearnError;
use crate::error::Result;
use argmin::core::observers::Observe;
use argmin::core::observers::ObserverMode;
use argmin::core::CostFunction;
use argmin::core::Error as ArgminError;
use argmin::core::Executor;
use argmin::core::Gradient;
use argmin::core::State;
use argmin::core::TerminationReason;
use argmin::core::TerminationStatus;
use argmin::core::KV;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use ndarray::Array1;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use serde::Serialize;
use std::cell::RefCell;
use std::fmt::Debug;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;
use tracing::info;

/// Mutable state owned by a single fit and threaded through every loss
/// evaluation.
///
/// All randomness of a fit (random initialization, impostor subsampling) is
/// drawn from `rng`, so a fixed seed reproduces a run exactly.
#[derive(Debug)]
pub struct FitState {
  pub rng: StdRng,
  /// Number of loss/gradient evaluations so far.
  pub n_evaluations: usize,
  /// Loss of the most recent evaluation.
  pub last_loss: Option<f64>,
  /// Active margin constraints at the most recent evaluation. Only the
  /// margin method records this.
  pub last_n_active: Option<usize>,
}

impl FitState {
  /// Seed from `random_state`, or from the operating system when `None`.
  pub fn new(random_state: Option<u64>) -> Self {
    let rng = match random_state {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_os_rng(),
    };
    Self {
      rng,
      n_evaluations: 0,
      last_loss: None,
      last_n_active: None,
    }
  }
}

/// A differentiable function of flat parameters.
pub trait Objective {
  /// Loss and gradient at `params`. The gradient has the same length as
  /// `params`.
  fn loss_and_gradient(&mut self, params: ArrayView1<f64>) -> Result<(f64, Array1<f64>)>;
}

/// Notified by a [`Minimizer`] after every completed iteration.
pub trait StepObserver: Send {
  /// `n_iter` counts completed iterations, starting at 1. Returning
  /// `ControlFlow::Break` ends the run.
  fn after_iteration(&mut self, params: ArrayView1<f64>, n_iter: usize) -> ControlFlow<()>;
}

/// Observer that never interrupts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StepObserver for NoopObserver {
  fn after_iteration(&mut self, _params: ArrayView1<f64>, _n_iter: usize) -> ControlFlow<()> {
    ControlFlow::Continue(())
  }
}

/// User hook receiving the current transformation after every iteration.
///
/// Any `FnMut(ArrayView2<f64>, usize) -> ControlFlow<()> + Send` closure
/// implements it. Returning `ControlFlow::Break` stops the fit; the
/// transformation reached so far is kept.
pub trait IterationCallback: Send {
  fn on_iteration(&mut self, transformation: ArrayView2<f64>, n_iter: usize) -> ControlFlow<()>;
}

impl<F> IterationCallback for F
where
  F: FnMut(ArrayView2<f64>, usize) -> ControlFlow<()> + Send,
{
  fn on_iteration(&mut self, transformation: ArrayView2<f64>, n_iter: usize) -> ControlFlow<()> {
    self(transformation, n_iter)
  }
}

/// How a minimization run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptimizationStatus {
  /// A tolerance was met.
  Converged,
  /// The iteration budget ran out first.
  MaxItersReached,
  /// An observer asked to stop.
  StoppedByCallback,
  /// The minimizer gave up, e.g. because the line search failed.
  Failed { reason: String },
}

impl OptimizationStatus {
  pub fn is_converged(&self) -> bool {
    matches!(self, OptimizationStatus::Converged)
  }
}

/// Result of a minimization run. `params` is always the best point
/// reached, even when the run did not converge.
#[derive(Debug, Clone)]
pub struct MinimizeOutcome {
  pub params: Array1<f64>,
  pub loss: Option<f64>,
  pub n_iter: usize,
  pub status: OptimizationStatus,
}

/// A gradient-based minimizer over flat parameter vectors.
///
/// Loss evaluations happen strictly one after another: a new evaluation
/// never starts before the previous gradient was returned.
pub trait Minimizer: Debug + Send + Sync {
  fn minimize(
    &self,
    objective: &mut dyn Objective,
    x0: Array1<f64>,
    params: &OptimizationParams,
    observer: Box<dyn StepObserver>,
  ) -> Result<MinimizeOutcome>;
}

/// Limited-memory BFGS with a More-Thuente line search, backed by argmin.
///
/// `tol` bounds both the gradient norm and the absolute change of the loss
/// between iterations.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lbfgs;

impl Minimizer for Lbfgs {
  fn minimize(
    &self,
    objective: &mut dyn Objective,
    x0: Array1<f64>,
    params: &OptimizationParams,
    observer: Box<dyn StepObserver>,
  ) -> Result<MinimizeOutcome> {
    let started = Instant::now();

    let linesearch: MoreThuenteLineSearch<Array1<f64>, Array1<f64>, f64> =
      MoreThuenteLineSearch::new();
    let solver: LBFGS<_, Array1<f64>, Array1<f64>, f64> =
      LBFGS::new(linesearch, params.lbfgs_memory)
        .with_tolerance_grad(params.tol)
        .and_then(|s| s.with_tolerance_cost(params.tol))
        .map_err(|e| MetricLearnError::Optimizer(e.to_string()))?;

    let progress = Arc::new(Mutex::new(Progress::default()));
    let forwarding = ForwardingObserver {
      inner: observer,
      progress: Arc::clone(&progress),
    };
    let problem = CachedObjective {
      objective: RefCell::new(objective),
      cache: RefCell::new(None),
    };

    let max_iters = params.max_iter as u64;
    let start = x0.clone();
    let run = Executor::new(problem, solver)
      .configure(|state| state.param(start).max_iters(max_iters))
      .add_observer(forwarding, ObserverMode::Always)
      .run();

    let last = progress
      .lock()
      .map(|p| p.clone())
      .unwrap_or_default();

    let outcome = match run {
      Ok(result) => {
        let state = result.state();
        let best = state
          .get_best_param()
          .or_else(|| state.get_param())
          .cloned()
          .unwrap_or(x0);
        let status = match state.get_termination_status() {
          TerminationStatus::Terminated(TerminationReason::SolverConverged)
          | TerminationStatus::Terminated(TerminationReason::TargetCostReached) => {
            OptimizationStatus::Converged
          }
          TerminationStatus::Terminated(TerminationReason::MaxItersReached) => {
            OptimizationStatus::MaxItersReached
          }
          TerminationStatus::Terminated(other) => OptimizationStatus::Failed {
            reason: format!("{other:?}"),
          },
          TerminationStatus::NotTerminated => OptimizationStatus::Failed {
            reason: "minimizer returned without terminating".to_string(),
          },
        };
        let best_cost = state.get_best_cost();
        MinimizeOutcome {
          params: best,
          loss: best_cost.is_finite().then_some(best_cost),
          n_iter: state.get_iter() as usize,
          status,
        }
      }
      Err(err) => {
        let status = if err.downcast_ref::<EarlyStop>().is_some() {
          OptimizationStatus::StoppedByCallback
        } else {
          OptimizationStatus::Failed {
            reason: err.to_string(),
          }
        };
        MinimizeOutcome {
          params: last.params.unwrap_or(x0),
          loss: last.loss,
          n_iter: last.n_iter,
          status,
        }
      }
    };

    info!(
      duration_ms = started.elapsed().as_millis(),
      n_iter = outcome.n_iter,
      status = ?outcome.status,
      "minimization complete"
    );

    Ok(outcome)
  }
}

#[derive(Debug, thiserror::Error)]
#[error("stopped by iteration observer")]
struct EarlyStop;

#[derive(Debug, Clone, Default)]
struct Progress {
  params: Option<Array1<f64>>,
  loss: Option<f64>,
  n_iter: usize,
}

struct Evaluation {
  params: Array1<f64>,
  loss: f64,
  gradient: Array1<f64>,
}

/// Adapts an [`Objective`] to argmin's separate cost and gradient calls.
///
/// argmin asks for the cost and the gradient of the same point in two
/// calls; the last evaluation is remembered so the objective runs once.
struct CachedObjective<'o> {
  objective: RefCell<&'o mut dyn Objective>,
  cache: RefCell<Option<Evaluation>>,
}

impl CachedObjective<'_> {
  fn evaluate(&self, params: &Array1<f64>) -> std::result::Result<(f64, Array1<f64>), ArgminError> {
    {
      let cache = self.cache.borrow();
      if let Some(hit) = cache.as_ref() {
        if hit.params == *params {
          return Ok((hit.loss, hit.gradient.clone()));
        }
      }
    }

    let (loss, gradient) = self
      .objective
      .borrow_mut()
      .loss_and_gradient(params.view())
      .map_err(ArgminError::new)?;
    *self.cache.borrow_mut() = Some(Evaluation {
      params: params.clone(),
      loss,
      gradient: gradient.clone(),
    });
    Ok((loss, gradient))
  }
}

impl CostFunction for CachedObjective<'_> {
  type Param = Array1<f64>;
  type Output = f64;

  fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
    Ok(self.evaluate(params)?.0)
  }
}

impl Gradient for CachedObjective<'_> {
  type Param = Array1<f64>;
  type Gradient = Array1<f64>;

  fn gradient(&self, params: &Self::Param) -> std::result::Result<Self::Gradient, ArgminError> {
    Ok(self.evaluate(params)?.1)
  }
}

/// argmin observer that records progress and forwards each iteration to a
/// [`StepObserver`]. A `Break` is turned into an [`EarlyStop`] error, the
/// only way an argmin observer can end a run.
struct ForwardingObserver {
  inner: Box<dyn StepObserver>,
  progress: Arc<Mutex<Progress>>,
}

impl<I> Observe<I> for ForwardingObserver
where
  I: State<Param = Array1<f64>, Float = f64>,
{
  fn observe_iter(&mut self, state: &I, _kv: &KV) -> std::result::Result<(), ArgminError> {
    let Some(params) = state.get_param() else {
      return Ok(());
    };
    let n_iter = {
      let mut progress = self
        .progress
        .lock()
        .map_err(|_| ArgminError::msg("progress lock poisoned"))?;
      progress.n_iter += 1;
      progress.params = Some(params.clone());
      let cost = state.get_cost();
      progress.loss = cost.is_finite().then_some(cost);
      progress.n_iter
    };

    match self.inner.after_iteration(params.view(), n_iter) {
      ControlFlow::Continue(()) => Ok(()),
      ControlFlow::Break(()) => Err(ArgminError::new(EarlyStop)),
    }
  }
}
