/// Class-conditional BigGAN on a synthetic two-class dataset.
///
/// Data:          32×32 RGB images, class 0 = filled squares, class 1 = filled
///                discs, random position, size and colour on a dark background
/// Architecture:  BigGAN 32px layout with channel multiplier 2
/// Loss:          hinge, two discriminator steps per generator step
/// Optimizers:    Adam (β1 = 0, β2 = 0.999), G lr = 1e-4, D lr = 4e-4
///
/// Run with:
///   cargo run --example toy_shapes --release
///
/// Checkpoints and sample grids are written under `toy_shapes_run/`. Set
/// `RUST_LOG=debug` to see per-step losses from the trainer itself.

use std::sync::mpsc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ferrite_biggan::logging::init_tracing;
use ferrite_biggan::train::{InMemoryDataset, SamplingMode};
use ferrite_biggan::{train_loop, AdversarialTrainer, ArchitectureSpec, EmaConfig, EmaSchedule, TrainConfig};

const SIZE: usize = 32;
const IMAGES_PER_CLASS: usize = 256;

// ---------------------------------------------------------------------------
// Synthetic data
// ---------------------------------------------------------------------------

/// Draws one shape into an NHWC byte buffer of a single image.
fn draw(image: &mut [u8], class: usize, rng: &mut StdRng) {
    let radius = rng.gen_range(4..10) as f64;
    let cx = rng.gen_range(radius..SIZE as f64 - radius);
    let cy = rng.gen_range(radius..SIZE as f64 - radius);
    let colour: [u8; 3] = [rng.gen_range(96..=255), rng.gen_range(96..=255), rng.gen_range(96..=255)];

    for y in 0..SIZE {
        for x in 0..SIZE {
            let (dx, dy) = (x as f64 + 0.5 - cx, y as f64 + 0.5 - cy);
            let inside = match class {
                0 => dx.abs() <= radius && dy.abs() <= radius,
                _ => dx * dx + dy * dy <= radius * radius,
            };
            let px = &mut image[(y * SIZE + x) * 3..(y * SIZE + x) * 3 + 3];
            if inside {
                px.copy_from_slice(&colour);
            } else {
                px.fill(16);
            }
        }
    }
}

fn toy_dataset(batch_size: usize) -> InMemoryDataset {
    let mut rng = StdRng::seed_from_u64(2024);
    let n = 2 * IMAGES_PER_CLASS;
    let image_len = SIZE * SIZE * 3;
    let mut pixels = vec![0u8; n * image_len];
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let class = i % 2;
        draw(&mut pixels[i * image_len..(i + 1) * image_len], class, &mut rng);
        labels.push(class);
    }
    InMemoryDataset::new(pixels, labels, (SIZE, SIZE, 3), batch_size, SamplingMode::Epochs)
        .expect("toy dataset is well formed")
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    init_tracing("info");

    let mut architecture = ArchitectureSpec::biggan(SIZE, 2, 2).expect("32px layout exists");
    architecture.latent_dim = 64;
    architecture.shared_dim = 32;

    let batch_size = 16;
    let mut config = TrainConfig::new(architecture, batch_size, 2000);
    config.checkpoint_interval = 250;
    config.checkpoint_dir = Some("toy_shapes_run".into());
    config.ema = EmaConfig { decay: 0.999, schedule: EmaSchedule::DelayedStart { start_step: 200 } };
    config.samples.truncation = Some(1.0);
    config.seed = 7;

    let (tx, rx) = mpsc::channel();
    config.progress_tx = Some(tx);

    println!("=== ferrite-biggan toy shapes ===");
    println!("{} images per class, batch size {}", IMAGES_PER_CLASS, batch_size);

    let worker = thread::spawn(move || {
        let mut trainer = AdversarialTrainer::new(config, toy_dataset(batch_size))?;
        let last = train_loop(&mut trainer)?;
        trainer.write_samples("toy_shapes_run/final_samples.png")?;
        Ok::<_, ferrite_biggan::GanError>(last)
    });

    for stats in rx {
        if stats.step % 50 == 0 {
            println!(
                "step {:>5}/{}  D loss: {:.4}  G loss: {:.4}  D(real): {:+.3}  D(fake): {:+.3}  ({} ms)",
                stats.step, stats.total_steps, stats.d_loss, stats.g_loss, stats.d_real, stats.d_fake, stats.elapsed_ms
            );
        }
    }

    match worker.join().expect("training thread panicked") {
        Ok(Some(last)) => println!("\nFinished at step {}. Final EMA samples: toy_shapes_run/final_samples.png", last.step),
        Ok(None) => println!("\nNo steps were run."),
        Err(e) => eprintln!("\nTraining failed: {}", e),
    }
}
