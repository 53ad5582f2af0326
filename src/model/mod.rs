//! Source-separation models and the gateway the web layer talks to.

pub mod demucs;
pub mod gateway;
pub mod model_manager;
pub mod registry;

use crate::{
    error::Result,
    types::{Stem, Waveform},
};

/// Anything that splits a mixture into named sources.
///
/// Implementations must return one stem per entry of [`SeparationModel::sources`], in that
/// order, each as long as the input.
pub trait SeparationModel: Send + Sync {
    fn sources(&self) -> &[String];
    fn separate(&self, input: &Waveform) -> Result<Vec<Stem>>;
}

/// Splits the input into equal shares, one per source. Useful without model weights.
pub struct DummyModel {
    sources: Vec<String>,
}

impl DummyModel {
    pub fn new(sources: Vec<String>) -> Self {
        Self { sources }
    }
}

impl Default for DummyModel {
    fn default() -> Self {
        Self::new(
            ["vocals", "drums", "bass", "other"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
    }
}

impl SeparationModel for DummyModel {
    fn sources(&self) -> &[String] {
        &self.sources
    }

    fn separate(&self, input: &Waveform) -> Result<Vec<Stem>> {
        let share = 1.0 / self.sources.len().max(1) as f32;
        Ok(self
            .sources
            .iter()
            .map(|name| Stem {
                name: name.clone(),
                waveform: Waveform::new(&input.samples * share, input.sample_rate),
            })
            .collect())
    }
}
