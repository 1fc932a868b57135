use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by model construction, the data contract and training.
///
/// Shape and configuration errors are never caught inside a component; they
/// propagate to the training loop, which stops with the last successful
/// checkpoint intact.
#[derive(Debug, Error)]
pub enum GanError {
    /// A batch, label or latent does not fit the configured architecture.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A loss or gradient contained NaN or infinity.
    #[error("non-finite {what} during {phase} at step {step}")]
    NonFiniteLoss {
        phase: &'static str,
        what: &'static str,
        step: u64,
    },

    /// Writing or renaming a checkpoint failed (after one retry).
    #[error("checkpoint i/o failed for {path}: {source}")]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The data source cannot supply another full batch this epoch.
    #[error("data source exhausted: {0}")]
    DataExhaustion(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, GanError>;

impl GanError {
    /// True for errors the training loop may recover from.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GanError::DataExhaustion(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GanError::ShapeMismatch("label 7 out of range".to_string());
        assert!(err.to_string().contains("label 7"));

        let err = GanError::NonFiniteLoss { phase: "discriminator", what: "loss", step: 12 };
        let msg = err.to_string();
        assert!(msg.contains("discriminator"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn test_only_exhaustion_is_recoverable() {
        assert!(GanError::DataExhaustion("epoch".into()).is_recoverable());
        assert!(!GanError::Config("bad".into()).is_recoverable());
        assert!(!GanError::NonFiniteLoss { phase: "generator", what: "gradient", step: 0 }
            .is_recoverable());
    }
}
