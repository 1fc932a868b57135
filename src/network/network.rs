use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::layers::module::Module;

/// A whole model that can be written to and read back from JSON.
///
/// Parameters and buffers (spectral-norm vectors, running statistics) are
/// persisted; gradients and activation caches are not.
pub trait Network: Module + Serialize + DeserializeOwned + Sized {
    /// Serializes the network to a pretty-printed JSON file.
    fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Deserializes a network from a JSON file previously written by `save_json`.
    fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
