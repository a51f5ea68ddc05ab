use crate::error::MetricLearnError;
use crate::error::Result;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use std::collections::BTreeMap;
use tracing::warn;

/// Training data after label encoding and singleton-class removal.
///
/// `codes[i]` is the class code of row `i` of `x`, in `0..n_classes`. Codes
/// are dense and ordered like the original labels. Row indices refer to
/// `x`, not to the caller's matrix, whenever singleton rows were dropped.
#[derive(Debug, Clone)]
pub struct EncodedLabels<L> {
  pub x: Array2<f64>,
  pub codes: Vec<usize>,
  /// Original label for each class code.
  pub classes: Vec<L>,
  /// Members of each class, as row indices into `x`, in ascending order.
  pub members: Vec<Vec<usize>>,
}

impl<L> EncodedLabels<L> {
  pub fn n_samples(&self) -> usize {
    self.codes.len()
  }

  pub fn n_classes(&self) -> usize {
    self.classes.len()
  }

  /// Size of the smallest class.
  pub fn min_class_size(&self) -> usize {
    self.members.iter().map(Vec::len).min().unwrap_or(0)
  }
}

/// Check that `x` is a non-empty finite matrix with one label per row.
pub fn check_inputs<L>(x: &ArrayView2<f64>, y: &[L]) -> Result<()> {
  if x.nrows() == 0 || x.ncols() == 0 {
    return Err(MetricLearnError::EmptyInput);
  }
  if x.nrows() != y.len() {
    return Err(MetricLearnError::ShapeMismatch(format!(
      "x has {} samples but y has {} labels",
      x.nrows(),
      y.len()
    )));
  }
  if x.iter().any(|v| !v.is_finite()) {
    return Err(MetricLearnError::invalid("x", "contains NaN or infinite values"));
  }
  Ok(())
}

/// Encode labels and drop every class with a single member.
///
/// Fails if fewer than two classes survive.
pub fn encode_without_singletons<L: Ord + Clone>(
  x: ArrayView2<f64>,
  y: &[L],
) -> Result<EncodedLabels<L>> {
  check_inputs(&x, y)?;

  let mut counts: BTreeMap<&L, usize> = BTreeMap::new();
  for label in y {
    *counts.entry(label).or_insert(0) += 1;
  }

  let n_singleton = counts.values().filter(|&&c| c == 1).count();
  let kept: BTreeMap<&L, usize> = counts
    .iter()
    .filter(|(_, count)| **count > 1)
    .enumerate()
    .map(|(code, (&label, _))| (label, code))
    .collect();

  if kept.len() < 2 {
    return Err(MetricLearnError::TooFewClasses { found: kept.len() });
  }

  if n_singleton > 0 {
    warn!(
      n_singleton,
      "singleton classes will be ignored during training"
    );
  }

  let keep_rows: Vec<usize> = (0..y.len()).filter(|&i| kept.contains_key(&y[i])).collect();
  let codes: Vec<usize> = keep_rows.iter().map(|&i| kept[&y[i]]).collect();
  let x = if keep_rows.len() == y.len() {
    x.to_owned()
  } else {
    x.select(Axis(0), &keep_rows)
  };

  let classes: Vec<L> = kept.keys().map(|&l| l.clone()).collect();
  let members = class_members(&codes, classes.len());

  Ok(EncodedLabels {
    x,
    codes,
    classes,
    members,
  })
}

/// Encode labels without dropping anything.
///
/// Fails if fewer than two distinct labels are present.
pub fn encode<L: Ord + Clone>(x: ArrayView2<f64>, y: &[L]) -> Result<EncodedLabels<L>> {
  check_inputs(&x, y)?;

  let mut lookup: BTreeMap<&L, usize> = y.iter().map(|l| (l, 0)).collect();
  for (code, value) in lookup.values_mut().enumerate() {
    *value = code;
  }
  if lookup.len() < 2 {
    return Err(MetricLearnError::TooFewClasses { found: lookup.len() });
  }

  let codes: Vec<usize> = y.iter().map(|l| lookup[l]).collect();
  let classes: Vec<L> = lookup.keys().map(|&l| l.clone()).collect();
  let members = class_members(&codes, classes.len());

  Ok(EncodedLabels {
    x: x.to_owned(),
    codes,
    classes,
    members,
  })
}

fn class_members(codes: &[usize], n_classes: usize) -> Vec<Vec<usize>> {
  let mut members = vec![Vec::new(); n_classes];
  for (i, &c) in codes.iter().enumerate() {
    members[c].push(i);
  }
  members
}
