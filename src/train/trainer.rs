use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::error::{GanError, Result};
use crate::layers::module::{Mode, Module};
use crate::math::tensor::Tensor;
use crate::network::discriminator::Discriminator;
use crate::network::generator::Generator;
use crate::network::network::Network;
use crate::optim::ema::EmaTracker;
use crate::optim::optimizer::Optimizer;
use crate::train::checkpoint::CheckpointStore;
use crate::train::context::TrainingContext;
use crate::train::data::{Batch, BatchSource};
use crate::train::samples::write_grid;
use crate::train::step_stats::StepStats;
use crate::train::train_config::TrainConfig;

pub const GENERATOR_FILE: &str = "generator.json";
pub const DISCRIMINATOR_FILE: &str = "discriminator.json";
pub const EMA_FILE: &str = "generator_ema.json";
pub const OPTIMIZERS_FILE: &str = "optimizers.json";
pub const STATE_FILE: &str = "state.json";
pub const SAMPLES_FILE: &str = "samples.png";

/// Where the trainer is within one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    AwaitingBatch,
    DiscriminatorStep,
    GeneratorStep,
    Checkpointing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OptimizerStates {
    generator: Optimizer,
    discriminator: Optimizer,
}

/// Means over the discriminator micro-batches of one step.
#[derive(Debug, Clone, Copy, Default)]
struct DiscriminatorOutcome {
    loss: f64,
    real: f64,
    fake: f64,
}

/// Alternating discriminator/generator training with gradient
/// accumulation and an EMA copy of the generator.
pub struct AdversarialTrainer<S: BatchSource> {
    pub config: TrainConfig,
    pub generator: Generator,
    pub discriminator: Discriminator,
    pub ema: EmaTracker<Generator>,
    pub g_optimizer: Optimizer,
    pub d_optimizer: Optimizer,
    pub context: TrainingContext,
    source: S,
    store: Option<CheckpointStore>,
    state: TrainerState,
    last_checkpoint: Option<u64>,
}

fn write_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
}

impl<S: BatchSource> AdversarialTrainer<S> {
    /// Validates `config` and builds freshly initialized networks from
    /// `config.seed`.
    pub fn new(config: TrainConfig, source: S) -> Result<Self> {
        config.validate()?;
        let context = TrainingContext::new(config.seed);
        let mut rng = context.init_rng();
        let generator = Generator::new(&config.architecture, &mut rng)?;
        let discriminator = Discriminator::new(&config.architecture, &mut rng)?;
        let ema = EmaTracker::new(&generator, config.ema);
        let g_optimizer = config.g_optimizer.build();
        let d_optimizer = config.d_optimizer.build();
        info!(
            generator_params = generator.num_parameters(),
            discriminator_params = discriminator.num_parameters(),
            seed = config.seed,
            "built BigGAN"
        );
        Self::assemble(config, source, generator, discriminator, ema, g_optimizer, d_optimizer, context)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        config: TrainConfig,
        source: S,
        generator: Generator,
        discriminator: Discriminator,
        ema: EmaTracker<Generator>,
        g_optimizer: Optimizer,
        d_optimizer: Optimizer,
        context: TrainingContext,
    ) -> Result<Self> {
        if source.num_classes() > config.architecture.num_classes {
            return Err(GanError::Config(format!(
                "data source has {} classes but the model is built for {}",
                source.num_classes(),
                config.architecture.num_classes
            )));
        }
        let store = config.checkpoint_dir.as_ref().map(CheckpointStore::new);
        Ok(AdversarialTrainer {
            config,
            generator,
            discriminator,
            ema,
            g_optimizer,
            d_optimizer,
            context,
            source,
            store,
            state: TrainerState::AwaitingBatch,
            last_checkpoint: None,
        })
    }

    /// Reloads a run from `config.checkpoint_dir`: the given step, or the
    /// latest one. Networks, optimizer states, the EMA shadow, the step
    /// counter and the seed all come from the checkpoint.
    pub fn resume(config: TrainConfig, source: S, step: Option<u64>) -> Result<Self> {
        config.validate()?;
        let store = config
            .checkpoint_dir
            .as_ref()
            .map(CheckpointStore::new)
            .ok_or_else(|| GanError::Config("resuming needs a checkpoint_dir".into()))?;
        let step = match step {
            Some(s) => s,
            None => store.latest()?.ok_or_else(|| {
                GanError::Config(format!("no checkpoint found under {}", store.root().display()))
            })?,
        };
        let dir = store.step_dir(step);
        if !dir.is_dir() {
            return Err(GanError::Config(format!("checkpoint {} does not exist", dir.display())));
        }

        let generator = Generator::load_json(dir.join(GENERATOR_FILE))?;
        let discriminator = Discriminator::load_json(dir.join(DISCRIMINATOR_FILE))?;
        let mut shadow = Generator::load_json(dir.join(EMA_FILE))?;
        shadow.set_requires_grad(false);
        let optimizers: OptimizerStates = read_json(dir.join(OPTIMIZERS_FILE))?;
        let context: TrainingContext = read_json(dir.join(STATE_FILE))?;

        if generator.spec != config.architecture || discriminator.spec != config.architecture {
            return Err(GanError::Config(format!(
                "checkpoint {} was trained with a different architecture",
                dir.display()
            )));
        }
        if context.step != step {
            return Err(GanError::Config(format!(
                "checkpoint directory for step {} records step {}",
                step, context.step
            )));
        }
        if context.seed != config.seed {
            warn!(checkpoint_seed = context.seed, config_seed = config.seed, "using the checkpoint's seed");
        }
        info!(step, path = %dir.display(), "resumed from checkpoint");

        let ema = EmaTracker { shadow, config: config.ema };
        let mut trainer = Self::assemble(
            config,
            source,
            generator,
            discriminator,
            ema,
            optimizers.generator,
            optimizers.discriminator,
            context,
        )?;
        trainer.last_checkpoint = Some(step);
        Ok(trainer)
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn last_checkpoint(&self) -> Option<u64> {
        self.last_checkpoint
    }

    /// One complete step: `d_steps` discriminator updates, one generator
    /// update and one EMA update.
    pub fn step(&mut self) -> Result<StepStats> {
        let started = Instant::now();
        let mut rng = self.context.step_rng();

        let d = self.discriminator_step(&mut rng)?;
        let g_loss = self.generator_step(&mut rng)?;
        let ema_decay = self.ema.update(&self.generator, self.context.step);
        self.context.step += 1;
        self.state = TrainerState::AwaitingBatch;

        let stats = StepStats {
            step: self.context.step,
            total_steps: self.config.total_steps,
            d_loss: d.loss,
            g_loss,
            d_real: d.real,
            d_fake: d.fake,
            ema_decay,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        debug!(
            step = stats.step,
            d_loss = stats.d_loss,
            g_loss = stats.g_loss,
            d_real = stats.d_real,
            d_fake = stats.d_fake,
            "step complete"
        );
        Ok(stats)
    }

    fn non_finite(&self, phase: &'static str, what: &'static str) -> GanError {
        GanError::NonFiniteLoss { phase, what, step: self.context.step }
    }

    /// Standard-normal latents and uniformly drawn class labels.
    fn sample_latents(&self, n: usize, rng: &mut StdRng) -> (Tensor, Vec<usize>) {
        let spec = &self.config.architecture;
        let z = Tensor::randn(&[n, spec.latent_dim], 1.0, rng);
        let labels = (0..n).map(|_| rng.gen_range(0..spec.num_classes)).collect();
        (z, labels)
    }

    /// Pulls a real batch, restarting the source once on exhaustion.
    fn fetch_batch(&mut self, rng: &mut StdRng) -> Result<Batch> {
        self.state = TrainerState::AwaitingBatch;
        let batch = match self.source.next_batch(rng) {
            Ok(batch) => batch,
            Err(e) if e.is_recoverable() => {
                warn!(step = self.context.step, reason = %e, "data source exhausted, starting a new epoch");
                self.source.restart();
                self.source.next_batch(rng).map_err(|e| match e {
                    GanError::DataExhaustion(msg) => {
                        GanError::DataExhaustion(format!("freshly restarted source cannot fill a batch: {}", msg))
                    }
                    other => other,
                })?
            }
            Err(e) => return Err(e),
        };
        self.check_batch(&batch)?;
        Ok(batch)
    }

    fn check_batch(&self, batch: &Batch) -> Result<()> {
        let spec = &self.config.architecture;
        let expected = [self.config.batch_size, spec.image_channels, spec.resolution, spec.resolution];
        if batch.images.shape != expected {
            return Err(GanError::ShapeMismatch(format!(
                "real batch has shape {:?}, expected {:?}",
                batch.images.shape, expected
            )));
        }
        if batch.labels.len() != self.config.batch_size {
            return Err(GanError::ShapeMismatch(format!(
                "real batch has {} labels for {} images",
                batch.labels.len(),
                self.config.batch_size
            )));
        }
        Ok(())
    }

    /// `d_steps` discriminator updates, each averaging the gradients of
    /// `accumulation_steps` micro-batches. Fakes and reals are scored in
    /// one pass as `concat(fake, real)`.
    fn discriminator_step(&mut self, rng: &mut StdRng) -> Result<DiscriminatorOutcome> {
        let accumulation = self.config.accumulation_steps;
        let loss_type = self.config.loss_type;
        self.discriminator.set_requires_grad(true);

        let mut total = DiscriminatorOutcome::default();
        for _ in 0..self.config.d_steps {
            self.discriminator.zero_grad();
            for _ in 0..accumulation {
                let real = self.fetch_batch(rng)?;
                self.state = TrainerState::DiscriminatorStep;
                let n = real.labels.len();
                let (z, fake_labels) = self.sample_latents(n, rng);
                let fake = self.generator.generate(&z, &fake_labels, Mode::Train)?;

                let images = Tensor::concat_batch(&fake, &real.images);
                let labels: Vec<usize> = fake_labels.iter().chain(real.labels.iter()).copied().collect();
                let scores = self.discriminator.discriminate(&images, &labels, Mode::Train)?;
                let (fake_scores, real_scores) = scores.split_at(n);

                let loss = loss_type.discriminator_loss(real_scores, fake_scores);
                if !loss.is_finite() {
                    return Err(self.non_finite("discriminator", "loss"));
                }
                let (d_real, d_fake) = loss_type.discriminator_derivative(real_scores, fake_scores);
                let grad: Vec<f64> = d_fake.into_iter().chain(d_real).collect();
                self.discriminator.backward(&grad);

                total.loss += loss;
                total.real += real_scores.iter().sum::<f64>() / n as f64;
                total.fake += fake_scores.iter().sum::<f64>() / n as f64;
            }
            self.discriminator.scale_grads(1.0 / accumulation as f64);
            if !self.discriminator.grads_are_finite() {
                return Err(self.non_finite("discriminator", "gradient"));
            }
            self.d_optimizer.step(&mut self.discriminator);
        }

        let count = (self.config.d_steps * accumulation) as f64;
        Ok(DiscriminatorOutcome { loss: total.loss / count, real: total.real / count, fake: total.fake / count })
    }

    /// One generator update through a frozen discriminator.
    fn generator_step(&mut self, rng: &mut StdRng) -> Result<f64> {
        self.state = TrainerState::GeneratorStep;
        let accumulation = self.config.accumulation_steps;
        let loss_type = self.config.loss_type;
        let n = self.config.batch_size;

        self.discriminator.set_requires_grad(false);
        self.generator.zero_grad();
        let mut total_loss = 0.0;
        for _ in 0..accumulation {
            let (z, labels) = self.sample_latents(n, rng);
            let fake = self.generator.generate(&z, &labels, Mode::Train)?;
            let scores = self.discriminator.discriminate(&fake, &labels, Mode::Train)?;
            let loss = loss_type.generator_loss(&scores);
            if !loss.is_finite() {
                return Err(self.non_finite("generator", "loss"));
            }
            let d_images = self.discriminator.backward(&loss_type.generator_derivative(&scores));
            self.generator.backward(&d_images);
            total_loss += loss;
        }
        self.discriminator.set_requires_grad(true);

        self.generator.scale_grads(1.0 / accumulation as f64);
        if !self.generator.grads_are_finite() {
            return Err(self.non_finite("generator", "gradient"));
        }
        self.g_optimizer.step(&mut self.generator);
        Ok(total_loss / accumulation as f64)
    }

    /// Fixed-latent samples from the EMA generator: one row per class with
    /// `samples_per_class` images, latents derived from the run seed.
    /// Returns the images and the number of rows.
    pub fn sample_grid(&mut self) -> Result<(Tensor, usize)> {
        let spec = &self.config.architecture;
        let samples = self.config.samples;
        let classes = samples.max_classes.map_or(spec.num_classes, |m| m.min(spec.num_classes));
        let n = classes * samples.samples_per_class;

        let mut rng = self.context.sample_rng();
        let z = match samples.truncation {
            Some(threshold) => Tensor::truncated_randn(&[n, spec.latent_dim], threshold, &mut rng),
            None => Tensor::randn(&[n, spec.latent_dim], 1.0, &mut rng),
        };
        let labels: Vec<usize> = (0..classes)
            .flat_map(|c| std::iter::repeat(c).take(samples.samples_per_class))
            .collect();
        let images = self.ema.shadow.generate(&z, &labels, Mode::Eval)?;
        Ok((images, classes))
    }

    /// Writes the EMA sample grid as a PNG.
    pub fn write_samples<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let (images, rows) = self.sample_grid()?;
        write_grid(&images, rows, path)
    }

    /// Persists both networks, both optimizer states, the EMA shadow and
    /// the run state, plus a sample grid. `Ok(None)` without a checkpoint
    /// directory.
    pub fn checkpoint(&mut self) -> Result<Option<PathBuf>> {
        if self.store.is_none() {
            return Ok(None);
        }
        self.state = TrainerState::Checkpointing;
        let (images, rows) = self.sample_grid()?;
        let optimizers = OptimizerStates {
            generator: self.g_optimizer.clone(),
            discriminator: self.d_optimizer.clone(),
        };
        let step = self.context.step;

        let (generator, discriminator, shadow, context) =
            (&self.generator, &self.discriminator, &self.ema.shadow, &self.context);
        let path = match &self.store {
            Some(store) => store.write(step, |dir| {
                generator.save_json(dir.join(GENERATOR_FILE))?;
                discriminator.save_json(dir.join(DISCRIMINATOR_FILE))?;
                shadow.save_json(dir.join(EMA_FILE))?;
                write_json(&optimizers, dir.join(OPTIMIZERS_FILE))?;
                write_json(context, dir.join(STATE_FILE))?;
                write_grid(&images, rows, dir.join(SAMPLES_FILE))
            })?,
            None => return Ok(None),
        };
        self.last_checkpoint = Some(step);
        self.state = TrainerState::AwaitingBatch;
        Ok(Some(path))
    }
}
