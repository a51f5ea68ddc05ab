use crate::error::MetricLearnError;
use crate::error::Result;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;

/// Flatten a transformation row by row into a parameter vector.
pub fn flatten(transformation: ArrayView2<f64>) -> Array1<f64> {
  transformation.iter().copied().collect()
}

/// Inverse of [`flatten`]: reshape a parameter vector into a matrix with
/// `n_features` columns.
pub fn unflatten(params: ArrayView1<f64>, n_features: usize) -> Result<Array2<f64>> {
  if n_features == 0 || params.len() % n_features != 0 {
    return Err(MetricLearnError::ShapeMismatch(format!(
      "{} parameters cannot be reshaped into rows of {} features",
      params.len(),
      n_features
    )));
  }
  let n_components = params.len() / n_features;
  Array2::from_shape_vec((n_components, n_features), params.to_vec())
    .map_err(|e| MetricLearnError::ShapeMismatch(e.to_string()))
}
