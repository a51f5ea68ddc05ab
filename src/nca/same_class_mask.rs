use ndarray::Array2;

/// `mask[(i, j)]` is true when samples `i` and `j` share a class code.
///
/// The diagonal is true; the loss never looks at it because
/// self-probabilities are zero.
pub fn same_class_mask(codes: &[usize]) -> Array2<bool> {
  let n = codes.len();
  Array2::from_shape_fn((n, n), |(i, j)| codes[i] == codes[j])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn marks_pairs_with_equal_codes() {
    let mask = same_class_mask(&[0, 1, 0]);
    assert!(mask[(0, 2)] && mask[(2, 0)]);
    assert!(!mask[(0, 1)] && !mask[(1, 2)]);
    assert!(mask[(1, 1)]);
  }
}
