use crate::error::MetricLearnError;
use crate::error::Result;
use ndarray::Array2;
use serde::Deserialize;
use serde::Serialize;

/// Sample count above which [`ImpostorStore::Auto`] picks the sparse store.
pub const SPARSE_STORE_THRESHOLD: usize = 6500;

const BYTES_PER_MIB: usize = 1024 * 1024;

/// How the initial linear transformation is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Init {
  /// Pick `Lda`, then `Pca`, then `Identity`, whichever is the first one that
  /// can produce the requested number of components.
  ///
  /// `Lda` is used when `n_components <= min(n_features, n_classes - 1)`,
  /// `Pca` when `n_components < min(n_features, n_samples)`.
  Auto,

  /// Leading principal components of the inputs.
  Pca,

  /// Most discriminative components of the inputs. At most `n_classes - 1`
  /// rows are non-zero; remaining rows are left at zero.
  Lda,

  /// Identity, truncated to the first `n_components` rows.
  Identity,

  /// Entries drawn from a standard normal distribution.
  Random,

  /// A user-provided matrix of shape (n_components, n_features).
  Matrix(Array2<f64>),
}

/// Storage strategy for the (sample, impostor) pairs found each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpostorStore {
  /// `Sparse` above [`SPARSE_STORE_THRESHOLD`] samples, `List` otherwise.
  Auto,

  /// Row, column and distance lists, with distances recorded on discovery.
  List,

  /// Sparse indicator matrix. Distances are recomputed once for the merged
  /// set, which costs a second distance pass but deduplicates pairs.
  Sparse,
}

impl ImpostorStore {
  /// Resolve `Auto` against the number of training samples.
  pub fn resolve(self, n_samples: usize) -> ImpostorStore {
    match self {
      ImpostorStore::Auto if n_samples > SPARSE_STORE_THRESHOLD => ImpostorStore::Sparse,
      ImpostorStore::Auto => ImpostorStore::List,
      other => other,
    }
  }
}

/// Configuration of the numerical minimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationParams {
  /// Maximum number of minimizer iterations.
  ///
  /// Must be >= 1.
  ///
  /// Default: 50
  pub max_iter: usize,

  /// Convergence tolerance, applied both to the gradient norm and to the
  /// change in loss between iterations.
  ///
  /// Must be finite and >= 0.
  ///
  /// Default: 1e-5
  pub tol: f64,

  /// Number of correction pairs kept by L-BFGS.
  ///
  /// Default: 7
  pub lbfgs_memory: usize,
}

impl Default for OptimizationParams {
  fn default() -> Self {
    Self {
      max_iter: 50,
      tol: 1e-5,
      lbfgs_memory: 7,
    }
  }
}

impl OptimizationParams {
  pub(crate) fn validate(&self) -> Result<()> {
    if self.max_iter < 1 {
      return Err(MetricLearnError::invalid(
        "max_iter",
        format!("must be >= 1, got {}", self.max_iter),
      ));
    }
    if !self.tol.is_finite() || self.tol < 0.0 {
      return Err(MetricLearnError::invalid(
        "tol",
        format!("must be finite and >= 0, got {}", self.tol),
      ));
    }
    if self.lbfgs_memory < 1 {
      return Err(MetricLearnError::invalid(
        "lbfgs_memory",
        format!("must be >= 1, got {}", self.lbfgs_memory),
      ));
    }
    Ok(())
  }
}

/// Large margin nearest neighbor configuration.
///
/// # Example
///
/// ```ignore
/// use metric_learn::config::{LmnnConfig, ImpostorStore};
///
/// let config = LmnnConfig {
///     n_neighbors: 5,
///     impostor_store: ImpostorStore::Sparse,
///     random_state: Some(42),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmnnConfig {
  /// Number of target neighbors per sample.
  ///
  /// Reduced (with a warning) to the size of the smallest non-singleton
  /// class minus one if it is too large.
  ///
  /// Default: 3
  pub n_neighbors: usize,

  /// Output dimensionality. `None` keeps the input dimensionality, or the
  /// row count of an `Init::Matrix`.
  ///
  /// Default: None
  pub n_components: Option<usize>,

  /// Initialization of the transformation.
  ///
  /// Default: Init::Pca
  pub init: Init,

  /// Maximum number of impostor pairs considered per iteration. Anything
  /// beyond this is uniformly subsampled, so results depend on the random
  /// source unless `random_state` is set.
  ///
  /// Default: 500_000
  pub max_impostors: usize,

  /// Impostor storage strategy.
  ///
  /// Default: ImpostorStore::Auto
  pub impostor_store: ImpostorStore,

  /// Memory budget in MiB for one block of the blockwise distance engine.
  ///
  /// Default: 8
  pub block_size_mib: usize,

  /// Seed for impostor subsampling and random initialization. `None` seeds
  /// from the operating system.
  ///
  /// Default: None
  pub random_state: Option<u64>,

  /// Minimizer configuration.
  pub optimization: OptimizationParams,
}

impl Default for LmnnConfig {
  fn default() -> Self {
    Self {
      n_neighbors: 3,
      n_components: None,
      init: Init::Pca,
      max_impostors: 500_000,
      impostor_store: ImpostorStore::Auto,
      block_size_mib: 8,
      random_state: None,
      optimization: OptimizationParams::default(),
    }
  }
}

impl LmnnConfig {
  pub(crate) fn validate(&self) -> Result<()> {
    if self.n_neighbors < 1 {
      return Err(MetricLearnError::invalid(
        "n_neighbors",
        format!("must be >= 1, got {}", self.n_neighbors),
      ));
    }
    if self.max_impostors < 1 {
      return Err(MetricLearnError::invalid(
        "max_impostors",
        format!("must be >= 1, got {}", self.max_impostors),
      ));
    }
    if self.block_size_mib < 1 {
      return Err(MetricLearnError::invalid(
        "block_size_mib",
        format!("must be >= 1, got {}", self.block_size_mib),
      ));
    }
    if self.block_size_mib.checked_mul(BYTES_PER_MIB).is_none() {
      return Err(MetricLearnError::invalid(
        "block_size_mib",
        format!("{} MiB overflows the addressable byte count", self.block_size_mib),
      ));
    }
    validate_n_components(self.n_components)?;
    self.optimization.validate()
  }

  pub(crate) fn block_size_bytes(&self) -> usize {
    self.block_size_mib.saturating_mul(BYTES_PER_MIB)
  }
}

/// Neighborhood components analysis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NcaConfig {
  /// Output dimensionality. `None` keeps the input dimensionality, or the
  /// row count of an `Init::Matrix`.
  ///
  /// Default: None
  pub n_components: Option<usize>,

  /// Initialization of the transformation.
  ///
  /// Default: Init::Auto
  pub init: Init,

  /// Seed for random initialization.
  ///
  /// Default: None
  pub random_state: Option<u64>,

  /// Minimizer configuration.
  pub optimization: OptimizationParams,
}

impl Default for NcaConfig {
  fn default() -> Self {
    Self {
      n_components: None,
      init: Init::Auto,
      random_state: None,
      optimization: OptimizationParams::default(),
    }
  }
}

impl NcaConfig {
  pub(crate) fn validate(&self) -> Result<()> {
    validate_n_components(self.n_components)?;
    self.optimization.validate()
  }
}

fn validate_n_components(n_components: Option<usize>) -> Result<()> {
  match n_components {
    Some(0) => Err(MetricLearnError::invalid("n_components", "must be >= 1, got 0")),
    _ => Ok(()),
  }
}
