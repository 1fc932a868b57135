pub mod tensor;
pub mod ops;
pub mod init;

pub use tensor::Tensor;
pub use init::InitScheme;
