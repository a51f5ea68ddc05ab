use crate::error::MetricLearnError;
use crate::error::Result;
use nalgebra::DMatrix;
use nalgebra::SymmetricEigen;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use std::fmt::Debug;

/// Eigenvalues below this fraction of the largest one are treated as zero
/// when whitening the within-class scatter.
const RANK_TOLERANCE: f64 = 1e-10;

/// Linear maps computed from data, used to initialize a transformation.
///
/// Both methods return a matrix of shape (n_components, n_features) whose
/// rows are the components, most significant first.
pub trait Decomposition: Debug + Send + Sync {
  /// Leading principal axes of `x`.
  fn principal_components(&self, x: ArrayView2<f64>, n_components: usize) -> Result<Array2<f64>>;

  /// Most discriminative directions of `x` for the classes in `codes`.
  ///
  /// At most `n_classes - 1` directions exist. Requesting more is an error.
  fn discriminant_components(
    &self,
    x: ArrayView2<f64>,
    codes: &[usize],
    n_classes: usize,
    n_components: usize,
  ) -> Result<Array2<f64>>;
}

/// Dense symmetric eigendecompositions through nalgebra.
#[derive(Debug, Default, Clone, Copy)]
pub struct EigenDecomposition;

impl Decomposition for EigenDecomposition {
  fn principal_components(&self, x: ArrayView2<f64>, n_components: usize) -> Result<Array2<f64>> {
    let (n_samples, n_features) = x.dim();
    check_n_components(n_components, n_features)?;

    let mean = x
      .mean_axis(Axis(0))
      .ok_or(MetricLearnError::EmptyInput)?;
    let centered = &x - &mean.insert_axis(Axis(0));
    let covariance = centered.t().dot(&centered) / (n_samples.max(2) - 1) as f64;

    let (_, vectors) = sorted_eigen(&covariance)?;
    let mut components = Array2::<f64>::zeros((n_components, n_features));
    for (mut row, vector) in components.outer_iter_mut().zip(vectors.columns()) {
      row.assign(&vector);
    }
    fix_signs(&mut components);
    Ok(components)
  }

  fn discriminant_components(
    &self,
    x: ArrayView2<f64>,
    codes: &[usize],
    n_classes: usize,
    n_components: usize,
  ) -> Result<Array2<f64>> {
    let (n_samples, n_features) = x.dim();
    check_n_components(n_components, n_features)?;
    if codes.len() != n_samples {
      return Err(MetricLearnError::ShapeMismatch(format!(
        "{} class codes for {} samples",
        codes.len(),
        n_samples
      )));
    }

    // class means and priors
    let mut means = Array2::<f64>::zeros((n_classes, n_features));
    let mut counts = Array1::<f64>::zeros(n_classes);
    for (row, &c) in x.outer_iter().zip(codes.iter()) {
      means.row_mut(c).scaled_add(1.0, &row);
      counts[c] += 1.0;
    }
    for (mut mean, &count) in means.outer_iter_mut().zip(counts.iter()) {
      if count > 0.0 {
        mean /= count;
      }
    }
    let overall = x
      .mean_axis(Axis(0))
      .ok_or(MetricLearnError::EmptyInput)?;

    let mut within = Array2::<f64>::zeros((n_features, n_features));
    for (row, &c) in x.outer_iter().zip(codes.iter()) {
      let diff = (&row - &means.row(c)).insert_axis(Axis(1));
      within += &diff.dot(&diff.t());
    }
    within /= n_samples as f64;

    let mut between = Array2::<f64>::zeros((n_features, n_features));
    for (mean, &count) in means.outer_iter().zip(counts.iter()) {
      let diff = (&mean - &overall).insert_axis(Axis(1));
      between.scaled_add(count / n_samples as f64, &diff.dot(&diff.t()));
    }

    // whiten the within-class scatter, restricted to its range
    let (values, vectors) = sorted_eigen(&within)?;
    let largest = values.first().copied().unwrap_or(0.0);
    let rank = values
      .iter()
      .take_while(|&&v| largest > 0.0 && v > largest * RANK_TOLERANCE)
      .count();
    let whitening = if rank == 0 {
      Array2::<f64>::eye(n_features)
    } else {
      let mut w = vectors.slice(ndarray::s![.., ..rank]).to_owned();
      for (mut column, &v) in w.columns_mut().into_iter().zip(values.iter()) {
        column /= v.sqrt();
      }
      w
    };

    let whitened_between = whitening.t().dot(&between).dot(&whitening);
    let (_, directions) = sorted_eigen(&whitened_between)?;
    let scalings = whitening.dot(&directions);

    let n_informative = n_classes.saturating_sub(1).min(scalings.ncols());
    if n_components > n_informative {
      return Err(MetricLearnError::Decomposition(format!(
        "only {n_informative} discriminant directions are available, {n_components} were requested"
      )));
    }
    let mut components =
      Array2::from_shape_fn((n_components, n_features), |(i, j)| scalings[(j, i)]);
    fix_signs(&mut components);
    Ok(components)
  }
}

fn check_n_components(n_components: usize, n_features: usize) -> Result<()> {
  if n_components > n_features {
    return Err(MetricLearnError::DimensionalityTooLarge {
      requested: n_components,
      available: n_features,
    });
  }
  Ok(())
}

/// Eigenvalues in descending order, with the matching eigenvectors as
/// columns.
fn sorted_eigen(symmetric: &Array2<f64>) -> Result<(Vec<f64>, Array2<f64>)> {
  let n = symmetric.nrows();
  let matrix = DMatrix::from_fn(n, n, |i, j| symmetric[(i, j)]);
  let eigen = SymmetricEigen::try_new(matrix, f64::EPSILON, 0).ok_or_else(|| {
    MetricLearnError::Decomposition("symmetric eigendecomposition did not converge".to_string())
  })?;

  let mut order: Vec<usize> = (0..n).collect();
  order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

  let values = order.iter().map(|&i| eigen.eigenvalues[i]).collect();
  let vectors = Array2::from_shape_fn((n, n), |(row, col)| eigen.eigenvectors[(row, order[col])]);
  Ok((values, vectors))
}

/// Flip each row so that its largest-magnitude entry is positive.
fn fix_signs(components: &mut Array2<f64>) {
  for mut row in components.outer_iter_mut() {
    let pivot = row
      .iter()
      .copied()
      .fold(0.0f64, |best, v| if v.abs() > best.abs() { v } else { best });
    if pivot < 0.0 {
      row.mapv_inplace(|v| -v);
    }
  }
}
