use serde::{Serialize, Deserialize};

/// Summary of one completed discriminator + generator update.
///
/// Returned by `AdversarialTrainer::step` and, when a `progress_tx` channel
/// is configured in `TrainConfig`, sent once per step by `train_loop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStats {
    /// Number of completed steps, including this one.
    pub step: u64,
    pub total_steps: u64,
    /// Mean discriminator loss over all of this step's micro-batches.
    pub d_loss: f64,
    /// Mean generator loss over this step's micro-batches.
    pub g_loss: f64,
    /// Mean discriminator score on real images.
    pub d_real: f64,
    /// Mean discriminator score on generated images during the D update.
    pub d_fake: f64,
    /// EMA decay applied after the generator update.
    pub ema_decay: f64,
    /// Wall-clock duration of this step in milliseconds.
    pub elapsed_ms: u64,
}
