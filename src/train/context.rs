use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Serialize, Deserialize};

const STEP_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;
const SAMPLE_STREAM: u64 = 0xD1B5_4A32_D192_ED03;

/// Mutable run state: how many steps have completed and the run seed.
///
/// Random numbers are never drawn from a long-lived generator. Each step
/// derives its own `StdRng` from `(seed, step)`, so a run resumed from a
/// checkpoint draws exactly what the uninterrupted run would have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingContext {
    pub step: u64,
    pub seed: u64,
}

fn mix(mut z: u64) -> u64 {
    // splitmix64 finalizer
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl TrainingContext {
    pub fn new(seed: u64) -> TrainingContext {
        TrainingContext { step: 0, seed }
    }

    /// Generator for the step about to run.
    pub fn step_rng(&self) -> StdRng {
        StdRng::seed_from_u64(mix(self.seed ^ mix(self.step.wrapping_add(1).wrapping_mul(STEP_STREAM))))
    }

    /// Generator for the fixed sample-grid latents; the same for the whole run.
    pub fn sample_rng(&self) -> StdRng {
        StdRng::seed_from_u64(mix(self.seed ^ SAMPLE_STREAM))
    }

    /// Generator for weight initialization.
    pub fn init_rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }
}
