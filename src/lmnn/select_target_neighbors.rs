use crate::error::Result;
use crate::neighbors::NeighborSearch;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use rayon::prelude::*;
use std::time::Instant;
use tracing::info;
use typed_builder::TypedBuilder;

/*
  Find the target neighbors of each sample: its `n_neighbors` nearest
  samples of the same class, excluding itself.

  Each class is searched independently (on the rayon pool), so a neighbor
  can only ever come from the query's own class. The search returns
  indices local to the class subset; they are mapped back to rows of `x`
  before being written out.

  Parameters
  ----------
  x: array of shape (n_samples, n_features)
      The training samples.

  members: list of n_classes index lists
      Row indices of `x` belonging to each class, every class with more than
      `n_neighbors` members.

  n_neighbors: int
      Number of target neighbors per sample.

  search: NeighborSearch
      The k-nearest-neighbor capability used inside each class.

  Returns
  -------
  target_neighbors: array of shape (n_samples, n_neighbors)
      Row indices into `x`, nearest first.
*/
#[derive(TypedBuilder)]
pub struct SelectTargetNeighbors<'a> {
  x: ArrayView2<'a, f64>,
  members: &'a [Vec<usize>],
  n_neighbors: usize,
  search: &'a dyn NeighborSearch,
}

impl<'a> SelectTargetNeighbors<'a> {
  pub fn exec(self) -> Result<Array2<usize>> {
    let SelectTargetNeighbors {
      x,
      members,
      n_neighbors,
      search,
    } = self;

    let started = Instant::now();
    let local: Vec<Array2<usize>> = members
      .par_iter()
      .map(|rows| {
        let subset = x.select(Axis(0), rows);
        search.kneighbors(subset.view(), n_neighbors)
      })
      .collect::<Result<Vec<_>>>()?;

    let mut targets = Array2::<usize>::zeros((x.nrows(), n_neighbors));
    for (rows, neighbors) in members.iter().zip(local.iter()) {
      for (local_row, local_neighbors) in neighbors.outer_iter().enumerate() {
        let global_row = rows[local_row];
        for (rank, &local_col) in local_neighbors.iter().enumerate() {
          targets[(global_row, rank)] = rows[local_col];
        }
      }
    }

    info!(
      duration_ms = started.elapsed().as_millis(),
      n_classes = members.len(),
      n_neighbors,
      "target neighbor selection complete"
    );

    Ok(targets)
  }
}
