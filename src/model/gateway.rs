use std::sync::Arc;

use tracing::{error, info};

use crate::{
    error::{Result, StemError},
    model::{demucs::DemucsModel, SeparationModel},
    types::{SeparationConfig, Stem, Waveform},
};

/// The process-wide handle on the separation model.
///
/// Built once at startup. When the model fails to load the gateway stays around in a
/// degraded state and every [`ModelGateway::separate`] call fails with
/// [`StemError::ModelUnavailable`] until the process is restarted.
#[derive(Clone)]
pub struct ModelGateway {
    model: Option<Arc<dyn SeparationModel>>,
}

impl ModelGateway {
    pub fn new(model: Arc<dyn SeparationModel>) -> Self {
        Self { model: Some(model) }
    }

    pub fn unavailable() -> Self {
        Self { model: None }
    }

    /// Resolves, downloads if needed, and loads the configured model.
    pub fn load(config: &SeparationConfig) -> Self {
        Self::from_loader(|| {
            let model = DemucsModel::load(config)?;
            Ok(Arc::new(model) as Arc<dyn SeparationModel>)
        })
    }

    pub fn from_loader<F>(load: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn SeparationModel>>,
    {
        match load() {
            Ok(model) => {
                info!(sources = ?model.sources(), "separation model ready");
                Self::new(model)
            }
            Err(e) => {
                error!(error = %e, "Model loading error; separation is disabled until restart");
                Self::unavailable()
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    /// The model's source vocabulary; empty when degraded.
    pub fn sources(&self) -> &[String] {
        self.model.as_deref().map(|m| m.sources()).unwrap_or(&[])
    }

    pub fn separate(&self, input: &Waveform) -> Result<Vec<Stem>> {
        let model = self.model.as_ref().ok_or(StemError::ModelUnavailable)?;
        let stems = model.separate(input)?;
        if stems.len() != model.sources().len() {
            return Err(StemError::Inference(format!(
                "model returned {} stems but declares {}",
                stems.len(),
                model.sources().len()
            )));
        }
        Ok(stems)
    }
}
