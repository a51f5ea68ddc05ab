pub mod compute_grad_static;
pub mod constants;
pub mod find_impostors;
pub mod lmnn;
pub mod loss_grad;
pub mod push_loss;
pub mod select_target_neighbors;
pub mod sum_weighted_outer_differences;

pub use compute_grad_static::compute_grad_static;
pub use find_impostors::FindImpostors;
pub use find_impostors::Impostors;
pub use lmnn::Lmnn;
pub use loss_grad::MarginObjective;
pub use push_loss::compute_push_loss;
pub use select_target_neighbors::SelectTargetNeighbors;
pub use sum_weighted_outer_differences::sum_weighted_outer_differences;
