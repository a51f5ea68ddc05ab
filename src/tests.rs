#[cfg(test)]
mod tests {
  use crate::config::ImpostorStore;
  use crate::config::Init;
  use crate::config::LmnnConfig;
  use crate::config::NcaConfig;
  use crate::config::OptimizationParams;
  use crate::distances::squared_euclidean;
  use crate::error::MetricLearnError;
  use crate::error::Result;
  use crate::labels::encode;
  use crate::labels::encode_without_singletons;
  use crate::lmnn::compute_grad_static;
  use crate::lmnn::MarginObjective;
  use crate::lmnn::SelectTargetNeighbors;
  use crate::nca::same_class_mask;
  use crate::nca::ProbabilisticObjective;
  use crate::neighbors::BruteForceSearch;
  use crate::optimizer::FitState;
  use crate::optimizer::MinimizeOutcome;
  use crate::optimizer::Minimizer;
  use crate::optimizer::Objective;
  use crate::optimizer::StepObserver;
  use crate::utils::reshape::flatten;
  use crate::utils::reshape::unflatten;
  use crate::EigenDecomposition;
  use crate::FittedMetric;
  use crate::Lmnn;
  use crate::MetricLearner;
  use crate::Nca;
  use crate::OptimizationStatus;
  use ndarray::array;
  use ndarray::Array1;
  use ndarray::Array2;
  use ndarray::ArrayView2;
  use proptest::prelude::*;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;
  use std::ops::ControlFlow;
  use std::sync::atomic::AtomicBool;
  use std::sync::atomic::AtomicUsize;
  use std::sync::atomic::Ordering;
  use std::sync::Arc;

  /// Three noisy blobs in `n_features` dimensions, `per_class` samples each.
  fn generate_blobs(per_class: usize, n_features: usize, seed: u64) -> (Array2<f64>, Vec<u32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let n_samples = 3 * per_class;
    let labels: Vec<u32> = (0..n_samples).map(|i| (i % 3) as u32).collect();
    let x = Array2::from_shape_fn((n_samples, n_features), |(i, j)| {
      let center = if j == 0 { 3.0 * labels[i] as f64 } else { 0.0 };
      center + rng.random_range(-1.5..1.5)
    });
    (x, labels)
  }

  fn nearest_neighbor_labels_match<L: PartialEq>(embedded: ArrayView2<f64>, y: &[L]) -> bool {
    (0..embedded.nrows()).all(|i| {
      let nearest = (0..embedded.nrows())
        .filter(|&j| j != i)
        .min_by(|&a, &b| {
          squared_euclidean(embedded.row(i), embedded.row(a))
            .total_cmp(&squared_euclidean(embedded.row(i), embedded.row(b)))
        })
        .unwrap();
      y[nearest] == y[i]
    })
  }

  /// Compare an analytic gradient against central differences.
  fn check_gradient(objective: &mut dyn Objective, params: Array1<f64>) {
    let (_, gradient) = objective.loss_and_gradient(params.view()).unwrap();
    let h = 1e-6;
    for i in 0..params.len() {
      let mut plus = params.clone();
      plus[i] += h;
      let mut minus = params.clone();
      minus[i] -= h;
      let (f_plus, _) = objective.loss_and_gradient(plus.view()).unwrap();
      let (f_minus, _) = objective.loss_and_gradient(minus.view()).unwrap();
      let numeric = (f_plus - f_minus) / (2.0 * h);
      assert!(
        (numeric - gradient[i]).abs() <= 1e-4 * (1.0 + gradient[i].abs()),
        "component {i}: analytic {} vs numeric {numeric}",
        gradient[i]
      );
    }
  }

  #[test]
  fn test_six_points_three_classes() {
    let x = array![
      [0.0, 0.0],
      [0.0, 1.0],
      [5.0, 0.0],
      [5.0, 1.0],
      [10.0, 0.0],
      [10.0, 1.0]
    ];
    let y = ["a", "a", "b", "b", "c", "c"];
    let lmnn = Lmnn::new(LmnnConfig {
      n_neighbors: 1,
      random_state: Some(0),
      ..Default::default()
    });
    let fitted = lmnn.fit(x.view(), &y).unwrap();

    assert_eq!(fitted.transformation().dim(), (2, 2));
    assert_eq!(fitted.n_neighbors(), Some(1));
    assert_eq!(fitted.classes(), &["a", "b", "c"]);
    assert_eq!(fitted.n_active_constraints(), Some(0));
    assert!(fitted.final_loss().unwrap() < 1.0);

    let embedded = fitted.embed(x.view()).unwrap();
    assert!(nearest_neighbor_labels_match(embedded.view(), &y));
  }

  #[test]
  fn test_lmnn_is_reproducible_with_seed() {
    let (x, y) = generate_blobs(10, 3, 1);
    let config = LmnnConfig {
      n_neighbors: 2,
      init: Init::Random,
      // force subsampling on every iteration
      max_impostors: 10,
      random_state: Some(7),
      optimization: OptimizationParams {
        max_iter: 5,
        ..Default::default()
      },
      ..Default::default()
    };

    let first = Lmnn::new(config.clone()).fit(x.view(), &y).unwrap();
    let second = Lmnn::new(config).fit(x.view(), &y).unwrap();
    assert_eq!(first.transformation(), second.transformation());
    assert_eq!(first.n_iter(), second.n_iter());
  }

  #[test]
  fn test_impostor_stores_reach_similar_solutions() {
    let (x, y) = generate_blobs(8, 2, 4);
    let fit = |store| {
      Lmnn::new(LmnnConfig {
        n_neighbors: 2,
        impostor_store: store,
        random_state: Some(0),
        optimization: OptimizationParams {
          max_iter: 1,
          ..Default::default()
        },
        ..Default::default()
      })
      .fit(x.view(), &y)
      .unwrap()
    };
    let list = fit(ImpostorStore::List);
    let sparse = fit(ImpostorStore::Sparse);
    for (a, b) in list.transformation().iter().zip(sparse.transformation().iter()) {
      assert!((a - b).abs() < 1e-6, "{a} vs {b}");
    }
  }

  /// Records whether it was ever asked to minimize.
  #[derive(Debug)]
  struct RecordingMinimizer {
    called: Arc<AtomicBool>,
  }

  impl Minimizer for RecordingMinimizer {
    fn minimize(
      &self,
      _objective: &mut dyn Objective,
      x0: Array1<f64>,
      _params: &OptimizationParams,
      _observer: Box<dyn StepObserver>,
    ) -> Result<MinimizeOutcome> {
      self.called.store(true, Ordering::SeqCst);
      Ok(MinimizeOutcome {
        params: x0,
        loss: None,
        n_iter: 0,
        status: OptimizationStatus::Converged,
      })
    }
  }

  #[test]
  fn test_too_many_components_fails_before_optimizing() {
    let (x, y) = generate_blobs(4, 3, 2);
    let called = Arc::new(AtomicBool::new(false));

    let lmnn = Lmnn::with_collaborators(
      LmnnConfig {
        n_components: Some(4),
        ..Default::default()
      },
      Box::new(BruteForceSearch::default()),
      Box::new(RecordingMinimizer {
        called: Arc::clone(&called),
      }),
      Box::new(EigenDecomposition),
    );
    let err = lmnn.fit(x.view(), &y).unwrap_err();
    assert!(matches!(
      err,
      MetricLearnError::DimensionalityTooLarge {
        requested: 4,
        available: 3
      }
    ));

    let nca = Nca::with_collaborators(
      NcaConfig {
        n_components: Some(5),
        ..Default::default()
      },
      Box::new(RecordingMinimizer {
        called: Arc::clone(&called),
      }),
      Box::new(EigenDecomposition),
    );
    assert!(nca.fit(x.view(), &y).is_err());
    assert!(!called.load(Ordering::SeqCst));
  }

  #[test]
  fn test_lda_init_needs_enough_classes() {
    // 2 classes in 3 features: LDA yields a single direction
    let x = array![
      [0.0, 0.0, 0.1],
      [0.3, 0.1, 0.0],
      [0.1, 0.4, 0.2],
      [2.0, 0.1, 0.0],
      [2.2, 0.3, 0.1],
      [2.1, 0.0, 0.3]
    ];
    let y = [0, 0, 0, 1, 1, 1];
    let called = Arc::new(AtomicBool::new(false));

    let lmnn = Lmnn::with_collaborators(
      LmnnConfig {
        n_neighbors: 1,
        init: Init::Lda,
        ..Default::default()
      },
      Box::new(BruteForceSearch::default()),
      Box::new(RecordingMinimizer {
        called: Arc::clone(&called),
      }),
      Box::new(EigenDecomposition),
    );
    assert!(matches!(
      lmnn.fit(x.view(), &y),
      Err(MetricLearnError::InvalidParameter { name: "init", .. })
    ));

    let nca = Nca::with_collaborators(
      NcaConfig {
        init: Init::Lda,
        ..Default::default()
      },
      Box::new(RecordingMinimizer {
        called: Arc::clone(&called),
      }),
      Box::new(EigenDecomposition),
    );
    assert!(matches!(
      nca.fit(x.view(), &y),
      Err(MetricLearnError::InvalidParameter { name: "init", .. })
    ));
    assert!(!called.load(Ordering::SeqCst));

    // one component is fine, and it is not a dead row
    let fitted = Lmnn::with_collaborators(
      LmnnConfig {
        n_neighbors: 1,
        n_components: Some(1),
        init: Init::Lda,
        ..Default::default()
      },
      Box::new(BruteForceSearch::default()),
      Box::new(RecordingMinimizer {
        called: Arc::clone(&called),
      }),
      Box::new(EigenDecomposition),
    )
    .fit(x.view(), &y)
    .unwrap();
    assert_eq!(fitted.transformation().dim(), (1, 3));
    assert!(fitted.transformation().iter().any(|&v| v != 0.0));
  }

  #[test]
  fn test_invalid_parameters_are_rejected() {
    let (x, y) = generate_blobs(4, 3, 2);
    let fit = |config: LmnnConfig| Lmnn::new(config).fit(x.view(), &y);

    assert!(matches!(
      fit(LmnnConfig {
        n_neighbors: 0,
        ..Default::default()
      }),
      Err(MetricLearnError::InvalidParameter {
        name: "n_neighbors",
        ..
      })
    ));
    assert!(matches!(
      fit(LmnnConfig {
        n_neighbors: 12,
        ..Default::default()
      }),
      Err(MetricLearnError::InvalidParameter {
        name: "n_neighbors",
        ..
      })
    ));
    assert!(matches!(
      fit(LmnnConfig {
        optimization: OptimizationParams {
          tol: -1.0,
          ..Default::default()
        },
        ..Default::default()
      }),
      Err(MetricLearnError::InvalidParameter { name: "tol", .. })
    ));
    assert!(matches!(
      fit(LmnnConfig {
        block_size_mib: usize::MAX,
        ..Default::default()
      }),
      Err(MetricLearnError::InvalidParameter {
        name: "block_size_mib",
        ..
      })
    ));
    assert!(matches!(
      fit(LmnnConfig {
        init: Init::Matrix(Array2::eye(2)),
        ..Default::default()
      }),
      Err(MetricLearnError::ShapeMismatch(_))
    ));
  }

  #[test]
  fn test_neighbor_count_is_reduced_and_singletons_dropped() {
    let (x, mut y) = generate_blobs(3, 2, 5);
    // a fourth class with a single member
    y[0] = 9;
    let fitted = Lmnn::new(LmnnConfig {
      n_neighbors: 5,
      random_state: Some(0),
      optimization: OptimizationParams {
        max_iter: 3,
        ..Default::default()
      },
      ..Default::default()
    })
    .fit(x.view(), &y)
    .unwrap();

    // classes 1 and 2 have 3 members, class 0 has 2 left
    assert_eq!(fitted.n_neighbors(), Some(1));
    assert_eq!(fitted.classes(), &[0, 1, 2]);
  }

  #[test]
  fn test_nca_requires_two_classes() {
    let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 2.0]];
    assert!(matches!(
      Nca::new(NcaConfig::default()).fit(x.view(), &[1, 1, 1]),
      Err(MetricLearnError::TooFewClasses { found: 1 })
    ));
  }

  #[test]
  fn test_nca_increases_retention() {
    let (x, y) = generate_blobs(8, 3, 3);
    let nca = Nca::new(NcaConfig {
      init: Init::Identity,
      random_state: Some(0),
      ..Default::default()
    });

    let encoded = encode(x.view(), &y).unwrap();
    let mask = same_class_mask(&encoded.codes);
    let mut state = FitState::new(Some(0));
    let (initial_loss, _) = ProbabilisticObjective::builder()
      .x(encoded.x.view())
      .same_class(mask.view())
      .state(&mut state)
      .build()
      .loss_and_gradient(flatten(Array2::<f64>::eye(3).view()).view())
      .unwrap();

    let fitted = nca.fit(x.view(), &y).unwrap();
    let final_loss = fitted.final_loss().unwrap();
    assert!(final_loss < initial_loss, "{final_loss} >= {initial_loss}");
    // at most every sample retained
    assert!(final_loss >= -(x.nrows() as f64) - 1e-9);
    assert_eq!(fitted.n_neighbors(), None);
    assert!(fitted.n_evaluations() > 0);
  }

  #[test]
  fn test_callback_can_stop_early() {
    let (x, y) = generate_blobs(6, 3, 6);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let lmnn = Lmnn::new(LmnnConfig {
      n_neighbors: 2,
      random_state: Some(0),
      optimization: OptimizationParams {
        max_iter: 50,
        tol: 0.0,
        ..Default::default()
      },
      ..Default::default()
    });
    let fitted = lmnn
      .fit_with_callback(x.view(), &y, move |transformation, n_iter| {
        assert_eq!(transformation.dim(), (3, 3));
        counter.fetch_add(1, Ordering::SeqCst);
        if n_iter >= 2 {
          ControlFlow::Break(())
        } else {
          ControlFlow::Continue(())
        }
      })
      .unwrap();

    assert_eq!(fitted.status(), &OptimizationStatus::StoppedByCallback);
    assert_eq!(fitted.n_iter(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(fitted.transformation().iter().all(|v| v.is_finite()));
  }

  #[test]
  fn test_warm_start() {
    let (x, y) = generate_blobs(5, 3, 8);
    let lmnn = Lmnn::new(LmnnConfig {
      n_neighbors: 2,
      n_components: Some(2),
      random_state: Some(0),
      optimization: OptimizationParams {
        max_iter: 3,
        ..Default::default()
      },
      ..Default::default()
    });
    let first = lmnn.fit(x.view(), &y).unwrap();

    // the warm start keeps its own output dimensionality
    let full = Lmnn::new(LmnnConfig {
      n_neighbors: 2,
      random_state: Some(0),
      ..Default::default()
    });
    let second = full.fit_from(&first, x.view(), &y).unwrap();
    assert_eq!(second.transformation().dim(), (2, 3));

    let narrow = x.slice(ndarray::s![.., ..2]).to_owned();
    assert!(matches!(
      full.fit_from(&first, narrow.view(), &y),
      Err(MetricLearnError::ShapeMismatch(_))
    ));
  }

  #[test]
  fn test_embed_is_linear_and_deterministic() {
    let (x, y) = generate_blobs(5, 3, 9);
    let fitted: FittedMetric<u32> = Lmnn::new(LmnnConfig {
      n_neighbors: 2,
      random_state: Some(0),
      optimization: OptimizationParams {
        max_iter: 3,
        ..Default::default()
      },
      ..Default::default()
    })
    .fit(x.view(), &y)
    .unwrap();

    let a = x.slice(ndarray::s![..4, ..]).to_owned();
    let b = x.slice(ndarray::s![4..8, ..]).to_owned();
    let combined = &a * 2.0 - &b * 0.5;
    let lhs = fitted.embed(combined.view()).unwrap();
    let rhs = fitted.embed(a.view()).unwrap() * 2.0 - fitted.embed(b.view()).unwrap() * 0.5;
    for (l, r) in lhs.iter().zip(rhs.iter()) {
      assert!((l - r).abs() < 1e-9);
    }
    assert_eq!(fitted.embed(a.view()).unwrap(), fitted.embed(a.view()).unwrap());
  }

  #[test]
  fn test_margin_gradient_matches_finite_differences() {
    let (x, y) = generate_blobs(4, 3, 10);
    let encoded = encode_without_singletons(x.view(), &y).unwrap();
    let search = BruteForceSearch::default();
    let targets = SelectTargetNeighbors::builder()
      .x(encoded.x.view())
      .members(&encoded.members)
      .n_neighbors(1)
      .search(&search)
      .build()
      .exec()
      .unwrap();
    let grad_static = compute_grad_static(encoded.x.view(), targets.view());

    let mut state = FitState::new(Some(0));
    let mut objective = MarginObjective::builder()
      .x(encoded.x.view())
      .members(&encoded.members)
      .target_neighbors(targets.view())
      .grad_static(grad_static.view())
      .store(ImpostorStore::List)
      .max_impostors(usize::MAX)
      .budget_bytes(1024)
      .state(&mut state)
      .build();

    let mut rng = StdRng::seed_from_u64(11);
    let params = Array1::from_shape_fn(6, |_| rng.random_range(-1.0..1.0));
    check_gradient(&mut objective, params);
  }

  #[test]
  fn test_probabilistic_gradient_matches_finite_differences() {
    let (x, y) = generate_blobs(4, 3, 12);
    let encoded = encode(x.view(), &y).unwrap();
    let mask = same_class_mask(&encoded.codes);
    let mut state = FitState::new(Some(0));
    let mut objective = ProbabilisticObjective::builder()
      .x(encoded.x.view())
      .same_class(mask.view())
      .state(&mut state)
      .build();

    let mut rng = StdRng::seed_from_u64(13);
    let params = Array1::from_shape_fn(6, |_| rng.random_range(-0.5..0.5));
    check_gradient(&mut objective, params);
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_reshape_round_trip(
      n_components in 1usize..6,
      n_features in 1usize..6,
      seed in any::<u64>(),
    ) {
      let mut rng = StdRng::seed_from_u64(seed);
      let t = Array2::from_shape_fn((n_components, n_features), |_| rng.random_range(-10.0..10.0));
      let back = unflatten(flatten(t.view()).view(), n_features).unwrap();
      prop_assert_eq!(back, t);
    }
  }
}
