use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ferrite_biggan::train::trainer::{GENERATOR_FILE, SAMPLES_FILE, STATE_FILE};
use ferrite_biggan::train::{CheckpointStore, InMemoryDataset, SamplingMode};
use ferrite_biggan::{train_loop, AdversarialTrainer, ArchitectureSpec, GanError, Module, TrainConfig};

fn dataset() -> InMemoryDataset {
    let mut rng = StdRng::seed_from_u64(3);
    let pixels = (0..6 * 32 * 32 * 3).map(|_| rng.gen()).collect();
    InMemoryDataset::new(pixels, vec![0, 1, 0, 1, 0, 1], (32, 32, 3), 2, SamplingMode::RandomSample).unwrap()
}

fn config(dir: &std::path::Path) -> TrainConfig {
    let mut arch = ArchitectureSpec::biggan(32, 2, 1).unwrap();
    arch.latent_dim = 16;
    arch.shared_dim = 4;
    let mut cfg = TrainConfig::new(arch, 2, 4);
    cfg.d_steps = 1;
    cfg.checkpoint_interval = 2;
    cfg.checkpoint_dir = Some(dir.to_path_buf());
    cfg.samples.samples_per_class = 2;
    cfg.samples.truncation = Some(1.0);
    cfg.seed = 11;
    cfg
}

fn values<M: Module>(m: &M) -> Vec<f64> {
    let mut out: Vec<f64> = m.params().iter().flat_map(|p| p.value.data.clone()).collect();
    out.extend(m.buffers().iter().flat_map(|b| b.data.clone()));
    out
}

#[test]
fn resumed_run_matches_uninterrupted_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut full = AdversarialTrainer::new(config(dir.path()), dataset()).unwrap();
    train_loop(&mut full).unwrap();

    let store = CheckpointStore::new(dir.path());
    assert_eq!(store.steps().unwrap(), vec![2, 4]);
    for file in [GENERATOR_FILE, STATE_FILE, SAMPLES_FILE] {
        assert!(store.step_dir(2).join(file).exists(), "missing {}", file);
    }

    let mut resumed = AdversarialTrainer::resume(config(dir.path()), dataset(), Some(2)).unwrap();
    assert_eq!(resumed.context.step, 2);
    train_loop(&mut resumed).unwrap();

    assert_eq!(resumed.context.step, 4);
    assert_eq!(values(&resumed.generator), values(&full.generator));
    assert_eq!(values(&resumed.discriminator), values(&full.discriminator));
    assert_eq!(values(&resumed.ema.shadow), values(&full.ema.shadow));
}

#[test]
fn resume_picks_the_latest_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut trainer = AdversarialTrainer::new(config(dir.path()), dataset()).unwrap();
    trainer.step().unwrap();
    trainer.checkpoint().unwrap();
    let resumed = AdversarialTrainer::resume(config(dir.path()), dataset(), None).unwrap();
    assert_eq!(resumed.context.step, 1);
    assert_eq!(resumed.last_checkpoint(), Some(1));
    assert_eq!(values(&resumed.generator), values(&trainer.generator));
}

#[test]
fn resume_without_checkpoints_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let err = AdversarialTrainer::resume(config(dir.path()), dataset(), None).err().unwrap();
    assert!(matches!(err, GanError::Config(_)));
}

#[test]
fn no_temporary_directories_remain() {
    let dir = tempfile::tempdir().unwrap();
    let mut trainer = AdversarialTrainer::new(config(dir.path()), dataset()).unwrap();
    trainer.checkpoint().unwrap();
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
}
