pub mod train_config;
pub mod step_stats;
pub mod context;
pub mod data;
pub mod checkpoint;
pub mod samples;
pub mod trainer;
pub mod loop_fn;

pub use train_config::{SampleConfig, TrainConfig};
pub use step_stats::StepStats;
pub use context::TrainingContext;
pub use data::{Batch, BatchSource, InMemoryDataset, SamplingMode};
pub use checkpoint::CheckpointStore;
pub use trainer::{AdversarialTrainer, TrainerState};
pub use loop_fn::train_loop;
