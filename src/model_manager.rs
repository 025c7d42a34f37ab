use std::{
    future::Future,
    sync::{Arc, Mutex},
};

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;

use crate::{
    embedding::{DenseEncoder, DenseVector},
    error::{Error, Result},
};

const ENCODER: &str = "colbert";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Manages the ColBERT model lifecycle, supporting lazy loading on first use.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    /// Creates a `ModelManager` for a HuggingFace model ID or local path.
    ///
    /// The model is not loaded until the first call to `encode_pooled`.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    /// Returns the model ID that will be (or has been) loaded.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        if self.model.is_none() {
            tracing::info!(model = %self.model_id, "loading ColBERT model");
            let device = default_device();
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(device)
                .try_into()
                .map_err(|e| Error::encoding(ENCODER, e))?;
            self.model = Some(colbert);
        }

        self.model
            .as_mut()
            .ok_or_else(|| Error::encoding(ENCODER, "model failed to load"))
    }

    /// Encodes one text into a single vector by mean-pooling its token
    /// embeddings.
    ///
    /// Texts are encoded one at a time so padding from other batch members
    /// never leaks into the pooled vector.
    pub fn encode_pooled(&mut self, text: &str) -> Result<Vec<f32>> {
        let model = self.ensure_loaded()?;
        let embeddings = model
            .encode(&[text.to_string()], false)
            .map_err(|e| Error::encoding(ENCODER, e))?;
        // Squeeze the batch dimension: [1, T, D] -> [T, D]
        let tokens = embeddings.squeeze(0).map_err(map_candle_err)?;
        mean_pool(&tokens)
    }
}

/// Average a `[T, D]` token matrix into a `D`-length vector.
fn mean_pool(tokens: &Tensor) -> Result<Vec<f32>> {
    tokens
        .mean(0)
        .map_err(map_candle_err)?
        .to_vec1::<f32>()
        .map_err(map_candle_err)
}

fn map_candle_err(e: candle_core::Error) -> Error {
    Error::encoding(ENCODER, format!("tensor computation error: {e}"))
}

/// [`DenseEncoder`] backed by a local ColBERT model.
///
/// Inference runs on the blocking pool; the model sits behind a mutex
/// because encoding needs exclusive access.
#[derive(Clone)]
pub struct ColbertEncoder {
    model: Arc<Mutex<ModelManager>>,
    model_id: String,
}

impl ColbertEncoder {
    pub fn new(model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self {
            model: Arc::new(Mutex::new(ModelManager::with_model_id(
                model_id.clone(),
            ))),
            model_id,
        }
    }
}

impl std::fmt::Debug for ColbertEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColbertEncoder")
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

impl DenseEncoder for ColbertEncoder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn encode_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<DenseVector>>> + Send {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        async move {
            tokio::task::spawn_blocking(move || {
                let mut model = model.lock().map_err(|_| {
                    Error::encoding(ENCODER, "model lock poisoned")
                })?;
                texts
                    .iter()
                    .map(|t| model.encode_pooled(t).map(DenseVector::normalized))
                    .collect::<Result<Vec<_>>>()
            })
            .await
            .map_err(|e| Error::encoding(ENCODER, e))?
        }
    }
}
