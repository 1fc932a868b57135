pub mod adam;
pub mod sgd;
pub mod optimizer;
pub mod ema;

pub use adam::Adam;
pub use sgd::Sgd;
pub use optimizer::{Optimizer, OptimizerConfig, OptimizerKind};
pub use ema::{ema_update, EmaConfig, EmaSchedule, EmaTracker};
