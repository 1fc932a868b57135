pub mod module;
pub mod spectral_norm;
pub mod linear;
pub mod conv;
pub mod embedding;
pub mod batch_norm;
pub mod attention;
pub mod residual;

#[cfg(test)]
pub mod gradcheck;

pub use module::{Mode, Module, Param};
pub use spectral_norm::SpectralNorm;
pub use linear::Linear;
pub use conv::Conv2d;
pub use embedding::Embedding;
pub use batch_norm::{BatchNorm2d, ConditionalBatchNorm2d};
pub use attention::SelfAttention;
pub use residual::{BlockConfig, DownBlock, UpBlock};
