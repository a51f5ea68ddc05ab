pub mod loss_grad;
pub mod nca;
pub mod same_class_mask;

pub use loss_grad::ProbabilisticObjective;
pub use nca::Nca;
pub use same_class_mask::same_class_mask;
