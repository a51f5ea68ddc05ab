/// Errors raised while validating inputs or running a fit.
///
/// Everything here is raised before the first loss evaluation, except
/// [`MetricLearnError::Optimizer`], which wraps failures reported by the
/// minimizer backend while it is being configured. Running out of
/// iterations is not an error; see [`crate::OptimizationStatus`].
#[derive(Debug, thiserror::Error)]
pub enum MetricLearnError {
  #[error("invalid parameter `{name}`: {reason}")]
  InvalidParameter { name: &'static str, reason: String },

  #[error("shape mismatch: {0}")]
  ShapeMismatch(String),

  #[error("at least 2 non-singleton classes are required, got {found}")]
  TooFewClasses { found: usize },

  #[error(
    "the requested output dimensionality ({requested}) cannot be greater than the input dimensionality ({available})"
  )]
  DimensionalityTooLarge { requested: usize, available: usize },

  #[error("input must contain at least one sample and one feature")]
  EmptyInput,

  #[error("decomposition failed: {0}")]
  Decomposition(String),

  #[error("optimizer failed: {0}")]
  Optimizer(String),
}

pub type Result<T> = std::result::Result<T, MetricLearnError>;

impl MetricLearnError {
  pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
    Self::InvalidParameter {
      name,
      reason: reason.into(),
    }
  }
}
