//! Supervised linear metric learning for nearest-neighbor classification.
//!
//! Given labeled samples, both learners find a linear map `L` such that
//! Euclidean distances between `L x_i` bring same-class samples together and
//! push different classes apart:
//!
//! - [`Lmnn`] (large margin nearest neighbor) pulls each sample towards a
//!   fixed set of same-class target neighbors and pushes every differently
//!   labeled impostor out of a unit margin around it.
//! - [`Nca`] (neighborhood components analysis) maximizes the expected
//!   leave-one-out accuracy of a stochastic nearest-neighbor classifier.
//!
//! # Example
//!
//! ```ignore
//! use metric_learn::{Lmnn, LmnnConfig, MetricLearner};
//!
//! let lmnn = Lmnn::new(LmnnConfig {
//!     n_neighbors: 3,
//!     random_state: Some(42),
//!     ..Default::default()
//! });
//! let fitted = lmnn.fit(x.view(), &labels)?;
//!
//! if !fitted.converged() {
//!     eprintln!("stopped after {} iterations", fitted.n_iter());
//! }
//! let embedded = fitted.embed(x.view())?;
//! ```
//!
//! # Features
//!
//! - **Bounded memory**: the margin method never materializes the full
//!   pairwise distance matrix; distances are computed in blocks of a
//!   configurable size
//! - **Parallel**: per-class neighbor searches and distance blocks run on
//!   the rayon pool
//! - **Reproducible**: all randomness comes from one seedable generator per fit
//! - **Pluggable**: neighbor search, minimizer and initialization are traits
//!
//! # Limitations
//!
//! - Dense inputs only
//! - The probabilistic method needs O(n_samples²) memory per evaluation
//!
//! # Public API
//!
//! * [`Lmnn`] / [`Nca`] - The learners
//! * [`MetricLearner`] - `fit`, `fit_with_callback`, `fit_from`
//! * [`FittedMetric`] - The learned transformation and fit diagnostics
//! * [`LmnnConfig`] / [`NcaConfig`] - Configuration parameters
//! * [`NeighborSearch`], [`Minimizer`], [`Decomposition`] - Collaborator traits

// Public modules
pub mod config;
pub mod error;

// Public re-exports (primary API)
pub use config::ImpostorStore;
pub use config::Init;
pub use config::LmnnConfig;
pub use config::NcaConfig;
pub use config::OptimizationParams;
pub use decomposition::Decomposition;
pub use decomposition::EigenDecomposition;
pub use error::MetricLearnError;
pub use error::Result;
pub use lmnn::Lmnn;
pub use model::FittedMetric;
pub use model::MetricLearner;
pub use nca::Nca;
pub use neighbors::BruteForceSearch;
pub use neighbors::NeighborSearch;
pub use optimizer::IterationCallback;
pub use optimizer::Lbfgs;
pub use optimizer::Minimizer;
pub use optimizer::OptimizationStatus;

// Internal modules (not exposed)
mod distances;
mod initialize;
mod labels;
mod lmnn;
mod model;
mod nca;
mod utils;

// Public modules (for advanced users)
pub mod decomposition;
pub mod neighbors;
pub mod optimizer;

// Tests
#[cfg(test)]
mod tests;
