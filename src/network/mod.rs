pub mod spec;
pub mod network;
pub mod generator;
pub mod discriminator;

pub use network::Network;
pub use spec::{ArchitectureSpec, BlockSpec};
pub use generator::{Generator, GeneratorStage};
pub use discriminator::{Discriminator, DiscriminatorStage};
