use crate::config::ImpostorStore;
use crate::distances::paired_squared_distances;
use crate::distances::BlockwiseDistances;
use crate::distances::DEFAULT_BLOCK_BYTES;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;
use rand::rngs::StdRng;
use sprs::CsMat;
use sprs::TriMat;
use std::time::Instant;
use tracing::debug;
use typed_builder::TypedBuilder;

/// (sample, impostor) pairs with the squared distance of each pair in the
/// current embedding, stored as parallel lists.
///
/// The first sample of every pair belongs to the class with the higher code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Impostors {
  pub rows: Vec<usize>,
  pub cols: Vec<usize>,
  pub distances: Vec<f64>,
}

impl Impostors {
  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  /// Keep only the pairs at `positions`, which must be ascending.
  fn retain_positions(&mut self, positions: &[usize]) {
    self.rows = positions.iter().map(|&p| self.rows[p]).collect();
    self.cols = positions.iter().map(|&p| self.cols[p]).collect();
    if !self.distances.is_empty() {
      self.distances = positions.iter().map(|&p| self.distances[p]).collect();
    }
  }
}

/*
  Find every pair of samples from different classes where at least one
  sample of the pair lies inside the other's margin radius.

  A pair (a, b), with a in class A and b in class B, is an impostor pair
  when d(a, b) < radius[a] OR d(a, b) < radius[b], where d is the squared
  Euclidean distance in the current embedding and radius is the squared
  distance to the farthest target neighbor plus the margin. Distances are
  compared unclipped.

  Class pairs are scanned one at a time: class A over every class B with a
  lower code, through the blockwise distance engine. Any scan producing
  more than `max_impostors` pairs is subsampled uniformly without
  replacement, and the merged result is subsampled again if it still
  exceeds the cap.

  The two storage strategies return the same pair set up to subsampling:

  - List records (row, col, distance) on discovery. Distances come from the
    block engine and are clipped at zero.
  - Sparse accumulates a 0/1 indicator matrix per scan and merges them by
    sparse addition. Distances are computed afterwards with a second,
    difference-based pass over the surviving pairs, so they can differ from
    the ones the scan compared against by floating-point round-off. Pairs
    come out in row-major order.

  Parameters
  ----------
  embedded: array of shape (n_samples, n_components)
      Samples in the current embedding.

  members: list of n_classes index lists
      Row indices of each class.

  margin_radii: array of shape (n_samples,)
      Squared distance of every sample to its farthest target neighbor,
      plus the margin.

  store: ImpostorStore
      List or Sparse. Auto must be resolved by the caller.

  max_impostors: int
      Cap on the number of pairs returned.

  budget_bytes: int (optional, default 8 MiB)
      Memory budget for a single distance block.

  rng: StdRng
      Random source for subsampling.
*/
#[derive(TypedBuilder)]
pub struct FindImpostors<'a> {
  embedded: ArrayView2<'a, f64>,
  members: &'a [Vec<usize>],
  margin_radii: ArrayView1<'a, f64>,
  store: ImpostorStore,
  max_impostors: usize,
  #[builder(default = DEFAULT_BLOCK_BYTES)]
  budget_bytes: usize,
  rng: &'a mut StdRng,
}

impl<'a> FindImpostors<'a> {
  pub fn exec(self) -> Impostors {
    let FindImpostors {
      embedded,
      members,
      margin_radii,
      store,
      max_impostors,
      budget_bytes,
      rng,
    } = self;

    let started = Instant::now();
    let n_samples = embedded.nrows();
    let sparse = matches!(store, ImpostorStore::Sparse);

    let mut found = Impostors::default();
    let mut indicator: CsMat<u32> = TriMat::new((n_samples, n_samples)).to_csr();

    for (class_a, outer) in members.iter().enumerate() {
      let x_outer = embedded.select(Axis(0), outer);
      for inner in &members[..class_a] {
        let x_inner = embedded.select(Axis(0), inner);

        let mut scan = Impostors::default();
        BlockwiseDistances::builder()
          .a(x_outer.view())
          .b(x_inner.view())
          .budget_bytes(budget_bytes)
          .build()
          .for_each_block(|offset, block| {
            for (r, row) in block.outer_iter().enumerate() {
              let a = outer[offset + r];
              let radius_a = margin_radii[a];
              for (c, &d) in row.iter().enumerate() {
                let b = inner[c];
                if d < radius_a || d < margin_radii[b] {
                  scan.rows.push(a);
                  scan.cols.push(b);
                  if !sparse {
                    scan.distances.push(d.max(0.0));
                  }
                }
              }
            }
          });

        if scan.len() > max_impostors {
          subsample(&mut scan, max_impostors, rng);
        }

        if sparse {
          let mut tri = TriMat::with_capacity((n_samples, n_samples), scan.len());
          for (&a, &b) in scan.rows.iter().zip(scan.cols.iter()) {
            tri.add_triplet(a, b, 1u32);
          }
          let scan_indicator: CsMat<u32> = tri.to_csr();
          indicator = &indicator + &scan_indicator;
        } else {
          found.rows.extend(scan.rows);
          found.cols.extend(scan.cols);
          found.distances.extend(scan.distances);
        }
      }
    }

    if sparse {
      for (_, (a, b)) in indicator.iter() {
        found.rows.push(a);
        found.cols.push(b);
      }
    }

    if found.len() > max_impostors {
      subsample(&mut found, max_impostors, rng);
    }

    if sparse {
      found.distances =
        paired_squared_distances(embedded, &found.rows, &found.cols, budget_bytes).to_vec();
    }

    debug!(
      duration_ms = started.elapsed().as_millis(),
      n_impostors = found.len(),
      sparse,
      "impostor search complete"
    );

    found
  }
}

/// Keep `amount` pairs chosen uniformly without replacement, preserving the
/// order in which they were found.
fn subsample(impostors: &mut Impostors, amount: usize, rng: &mut StdRng) {
  let mut positions = rand::seq::index::sample(rng, impostors.len(), amount).into_vec();
  positions.sort_unstable();
  impostors.retain_positions(&positions);
}
