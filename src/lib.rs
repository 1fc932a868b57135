pub mod error;
pub mod logging;
pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod train;

// Convenience re-exports
pub use error::{GanError, Result};
pub use math::tensor::Tensor;
pub use activation::activation::ActivationFunction;
pub use layers::module::{Mode, Module};
pub use network::{ArchitectureSpec, BlockSpec, Discriminator, Generator, Network};
pub use loss::loss_type::LossType;
pub use optim::ema::{EmaConfig, EmaSchedule, EmaTracker};
pub use train::{train_loop, AdversarialTrainer, BatchSource, TrainConfig};
