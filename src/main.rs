// The binary only checks a run configuration; training is driven from the
// library (see demos/toy_shapes.rs):
//   cargo run -- configs/tiny.yaml
use std::process::ExitCode;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info};

use ferrite_biggan::logging::init_tracing;
use ferrite_biggan::{Discriminator, Generator, Module, TrainConfig};

fn check(path: &str) -> ferrite_biggan::Result<()> {
    let config = TrainConfig::load_yaml(path)?;
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let generator = Generator::new(&config.architecture, &mut rng)?;
    let discriminator = Discriminator::new(&config.architecture, &mut rng)?;
    info!(
        resolution = config.architecture.resolution,
        classes = config.architecture.num_classes,
        generator_params = generator.num_parameters(),
        discriminator_params = discriminator.num_parameters(),
        "configuration is valid"
    );
    Ok(())
}

fn main() -> ExitCode {
    init_tracing("info");
    let Some(path) = std::env::args().nth(1) else {
        println!("ferrite-biggan: a from-scratch class-conditional GAN in Rust.");
        println!("Usage: ferrite-biggan <config.yaml>");
        return ExitCode::SUCCESS;
    };
    match check(&path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, path = %path, "invalid configuration");
            ExitCode::FAILURE
        }
    }
}
