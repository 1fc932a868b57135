use std::sync::atomic::Ordering;

use tracing::info;

use crate::error::Result;
use crate::train::data::BatchSource;
use crate::train::step_stats::StepStats;
use crate::train::trainer::AdversarialTrainer;

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Runs `trainer` until `config.total_steps` steps have completed and
/// returns the statistics of the **last completed step** (`None` when no
/// step ran).
///
/// A checkpoint is written every `checkpoint_interval` steps and once more
/// when the loop ends, unless the current step is already checkpointed.
///
/// # Early termination
/// The loop stops at the next step boundary if:
/// - the `progress_tx` receiver has been dropped, **or**
/// - `config.stop_flag` is set to `true`.
///
/// Any error aborts the run; the last successful checkpoint stays intact.
pub fn train_loop<S: BatchSource>(trainer: &mut AdversarialTrainer<S>) -> Result<Option<StepStats>> {
    let mut last = None;
    info!(
        from_step = trainer.context.step,
        total_steps = trainer.config.total_steps,
        "training started"
    );

    while trainer.context.step < trainer.config.total_steps {
        if stop_requested(trainer) {
            info!(step = trainer.context.step, "stop requested");
            break;
        }

        let stats = trainer.step()?;
        if stats.step % trainer.config.checkpoint_interval == 0 {
            trainer.checkpoint()?;
        }

        let receiver_gone = match trainer.config.progress_tx {
            Some(ref tx) => tx.send(stats.clone()).is_err(),
            None => false,
        };
        last = Some(stats);
        if receiver_gone {
            info!(step = trainer.context.step, "progress receiver dropped");
            break;
        }
    }

    if trainer.last_checkpoint() != Some(trainer.context.step) {
        trainer.checkpoint()?;
    }
    info!(step = trainer.context.step, "training stopped");
    Ok(last)
}

fn stop_requested<S: BatchSource>(trainer: &AdversarialTrainer<S>) -> bool {
    trainer
        .config
        .stop_flag
        .as_ref()
        .map_or(false, |flag| flag.load(Ordering::Relaxed))
}
