pub mod hinge;
pub mod non_saturating;
pub mod loss_type;

pub use hinge::HingeLoss;
pub use non_saturating::NonSaturatingLoss;
pub use loss_type::LossType;
