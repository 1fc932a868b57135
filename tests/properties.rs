use rand::rngs::StdRng;
use rand::SeedableRng;

use ferrite_biggan::train::{Batch, SamplingMode, InMemoryDataset};
use ferrite_biggan::{
    AdversarialTrainer, ArchitectureSpec, BatchSource, Discriminator, GanError, Generator, Mode, Result, Tensor,
    TrainConfig,
};

fn architecture() -> ArchitectureSpec {
    let mut arch = ArchitectureSpec::biggan(32, 3, 1).unwrap();
    arch.latent_dim = 20;
    arch.shared_dim = 6;
    arch
}

#[test]
fn last_class_is_accepted_and_one_past_is_rejected() {
    let arch = architecture();
    let mut rng = StdRng::seed_from_u64(0);
    let mut g = Generator::new(&arch, &mut rng).unwrap();
    let mut d = Discriminator::new(&arch, &mut rng).unwrap();
    let z = Tensor::randn(&[1, 20], 1.0, &mut rng);

    let image = g.generate(&z, &[2], Mode::Eval).unwrap();
    assert!(d.discriminate(&image, &[2], Mode::Eval).is_ok());

    assert!(matches!(g.generate(&z, &[3], Mode::Eval), Err(GanError::ShapeMismatch(_))));
    assert!(matches!(d.discriminate(&image, &[3], Mode::Eval), Err(GanError::ShapeMismatch(_))));
}

#[test]
fn eval_generation_is_deterministic_and_bounded() {
    let arch = architecture();
    let mut rng = StdRng::seed_from_u64(1);
    let mut g = Generator::new(&arch, &mut rng).unwrap();
    let z = Tensor::randn(&[2, 20], 1.0, &mut rng);
    let a = g.generate(&z, &[0, 1], Mode::Eval).unwrap();
    let b = g.generate(&z, &[0, 1], Mode::Eval).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.shape, vec![2, 3, 32, 32]);
    assert!(a.data.iter().all(|v| (-1.0..=1.0).contains(v)));
}

#[test]
fn scores_do_not_depend_on_batch_companions() {
    let arch = architecture();
    let mut rng = StdRng::seed_from_u64(2);
    let mut d = Discriminator::new(&arch, &mut rng).unwrap();
    let images = Tensor::randn(&[2, 3, 32, 32], 0.5, &mut rng);
    let pair = d.discriminate(&images, &[0, 2], Mode::Eval).unwrap();
    let first = Tensor::from_data(&[1, 3, 32, 32], images.sample(0).to_vec());
    let alone = d.discriminate(&first, &[0], Mode::Eval).unwrap();
    assert_eq!(alone[0], pair[0]);
}

/// A source that serves `remaining` batches in total and then stays
/// exhausted, restart or not.
struct Dwindling {
    remaining: usize,
}

impl BatchSource for Dwindling {
    fn next_batch(&mut self, rng: &mut StdRng) -> Result<Batch> {
        if self.remaining == 0 {
            return Err(GanError::DataExhaustion("nothing left".into()));
        }
        self.remaining -= 1;
        Ok(Batch { images: Tensor::randn(&[2, 3, 32, 32], 0.5, rng), labels: vec![0, 1] })
    }

    fn restart(&mut self) {}

    fn num_classes(&self) -> usize {
        2
    }
}

fn config() -> TrainConfig {
    let mut cfg = TrainConfig::new(architecture(), 2, 10);
    cfg.d_steps = 1;
    cfg
}

#[test]
fn exhaustion_after_restart_is_fatal() {
    let mut trainer = AdversarialTrainer::new(config(), Dwindling { remaining: 1 }).unwrap();
    trainer.step().unwrap();
    let err = trainer.step().unwrap_err();
    assert!(matches!(err, GanError::DataExhaustion(_)));
    assert_eq!(trainer.context.step, 1);
}

#[test]
fn epoch_boundaries_restart_the_source() {
    // six images at batch two: three batches per epoch, one per step
    let pixels = vec![128u8; 6 * 32 * 32 * 3];
    let labels = vec![0, 1, 2, 0, 1, 2];
    let ds = InMemoryDataset::new(pixels, labels, (32, 32, 3), 2, SamplingMode::Epochs).unwrap();
    let mut trainer = AdversarialTrainer::new(config(), ds).unwrap();
    for _ in 0..5 {
        trainer.step().unwrap();
    }
    assert_eq!(trainer.context.step, 5);
}

#[test]
fn source_with_more_classes_than_the_model_is_rejected() {
    let pixels = vec![0u8; 2 * 32 * 32 * 3];
    let ds = InMemoryDataset::new(pixels, vec![0, 5], (32, 32, 3), 2, SamplingMode::RandomSample).unwrap();
    let err = AdversarialTrainer::new(config(), ds).err().unwrap();
    assert!(matches!(err, GanError::Config(_)));
}
