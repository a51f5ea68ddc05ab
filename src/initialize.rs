use crate::config::Init;
use crate::decomposition::Decomposition;
use crate::error::MetricLearnError;
use crate::error::Result;
use ndarray::Array2;
use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use std::time::Instant;
use tracing::info;
use typed_builder::TypedBuilder;

/// Check `init` and `n_components` against the data shape, without computing
/// anything.
///
/// Returns the output dimensionality the fit will use.
pub fn validate_init(
  init: &Init,
  n_components: Option<usize>,
  n_features: usize,
) -> Result<usize> {
  if let Some(requested) = n_components {
    if requested > n_features {
      return Err(MetricLearnError::DimensionalityTooLarge {
        requested,
        available: n_features,
      });
    }
  }

  match init {
    Init::Matrix(matrix) => {
      let (rows, cols) = matrix.dim();
      if cols != n_features {
        return Err(MetricLearnError::ShapeMismatch(format!(
          "the input dimensionality of the init matrix ({cols}) must match the number of features ({n_features})"
        )));
      }
      if rows > cols {
        return Err(MetricLearnError::ShapeMismatch(format!(
          "the output dimensionality of the init matrix ({rows}) cannot be greater than its input dimensionality ({cols})"
        )));
      }
      if let Some(requested) = n_components {
        if requested != rows {
          return Err(MetricLearnError::ShapeMismatch(format!(
            "n_components ({requested}) does not match the output dimensionality of the init matrix ({rows})"
          )));
        }
      }
      if matrix.iter().any(|v| !v.is_finite()) {
        return Err(MetricLearnError::invalid("init", "matrix contains NaN or infinite values"));
      }
      Ok(rows)
    }
    _ => Ok(n_components.unwrap_or(n_features)),
  }
}

/// Reject discriminant initialization that cannot produce `n_components`
/// informative directions.
///
/// LDA yields at most `n_classes - 1` directions. Rows beyond that would stay
/// zero for the whole fit, since both objectives have gradients that are
/// linear in the transformation rows.
pub fn validate_discriminant(init: &Init, n_components: usize, n_classes: usize) -> Result<()> {
  let available = n_classes.saturating_sub(1);
  if matches!(init, Init::Lda) && n_components > available {
    return Err(MetricLearnError::invalid(
      "init",
      format!("lda yields at most {available} components, got n_components = {n_components}"),
    ));
  }
  Ok(())
}

/// Check that a previously fitted transformation can be applied to inputs
/// with `n_features` features.
pub fn validate_warm_start(previous: ArrayView2<f64>, n_features: usize) -> Result<()> {
  if previous.ncols() != n_features {
    return Err(MetricLearnError::ShapeMismatch(format!(
      "the new inputs have {} features, while the warm-start transformation expects {}",
      n_features,
      previous.ncols()
    )));
  }
  Ok(())
}

/// Replace `Init::Auto` with the first applicable strategy: discriminant
/// components when `n_components <= min(n_features, n_classes - 1)`,
/// principal components when `n_components < min(n_features, n_samples)`,
/// identity otherwise.
pub fn resolve_auto(
  init: &Init,
  n_components: usize,
  n_samples: usize,
  n_features: usize,
  n_classes: usize,
) -> Init {
  match init {
    Init::Auto if n_components <= n_features.min(n_classes.saturating_sub(1)) => Init::Lda,
    Init::Auto if n_components < n_features.min(n_samples) => Init::Pca,
    Init::Auto => Init::Identity,
    other => other.clone(),
  }
}

/*
  Produce the starting transformation of a fit.

  Parameters
  ----------
  init: Init
      Initialization strategy. Must have passed validate_init.

  n_components: int
      Output dimensionality, as returned by validate_init.

  x: array of shape (n_samples, n_features)

  codes: list of int
      Class code of every sample, used by discriminant initialization.

  n_classes: int

  rng: StdRng
      Random source of the fit, used by random initialization.

  decomposition: Decomposition
      Provider of principal and discriminant components.

  Returns
  -------
  transformation: array of shape (n_components, n_features)
*/
#[derive(TypedBuilder)]
pub struct InitializeTransformation<'a> {
  init: &'a Init,
  n_components: usize,
  x: ArrayView2<'a, f64>,
  codes: &'a [usize],
  n_classes: usize,
  rng: &'a mut StdRng,
  decomposition: &'a dyn Decomposition,
}

impl<'a> InitializeTransformation<'a> {
  pub fn exec(self) -> Result<Array2<f64>> {
    let InitializeTransformation {
      init,
      n_components,
      x,
      codes,
      n_classes,
      rng,
      decomposition,
    } = self;

    let started = Instant::now();
    let (n_samples, n_features) = x.dim();
    let resolved = resolve_auto(init, n_components, n_samples, n_features, n_classes);

    let transformation = match &resolved {
      Init::Identity | Init::Auto => Array2::<f64>::eye(n_features)
        .slice_move(ndarray::s![..n_components, ..]),
      Init::Random => Array2::from_shape_fn((n_components, n_features), |_| {
        rng.sample::<f64, _>(StandardNormal)
      }),
      Init::Pca => decomposition.principal_components(x, n_components)?,
      Init::Lda => decomposition.discriminant_components(x, codes, n_classes, n_components)?,
      Init::Matrix(matrix) => matrix.clone(),
    };

    info!(
      duration_ms = started.elapsed().as_millis(),
      init = ?resolved,
      n_components,
      "initialization complete"
    );

    Ok(transformation)
  }
}
