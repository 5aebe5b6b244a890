
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::{KbError, Result};

/// A loaded text embedding model
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn name(&self) -> &str;

    /// Length of every vector this model produces
    fn dimension(&self) -> usize;

    /// Whether `embed` may be called from several tasks at once
    fn supports_concurrent_inference(&self) -> bool {
        false
    }

    /// Embeds `texts`, returning one vector per input in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Produces an [`EmbeddingModel`] on first use
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn EmbeddingModel>>;
}

/// Lazily loaded, process-wide embedding model.
///
/// The model is loaded at most once. A failed load is not cached, so the next
/// call tries again. Models that are not safe for concurrent inference are
/// called under a lock.
pub struct Embedder {
    loader: Arc<dyn ModelLoader>,
    model: OnceCell<Arc<dyn EmbeddingModel>>,
    inference_lock: Mutex<()>,
}

impl fmt::Debug for Embedder {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedder")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

impl Embedder {
    #[inline]
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
            inference_lock: Mutex::new(()),
        }
    }

    /// Wraps an already loaded model
    #[inline]
    pub fn from_model(model: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            loader: Arc::new(PreloadedModel(Arc::clone(&model))),
            model: OnceCell::new_with(Some(model)),
            inference_lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// Returns the model, loading it on first call
    #[inline]
    pub async fn model(&self) -> Result<&Arc<dyn EmbeddingModel>> {
        self.model
            .get_or_try_init(|| async {
                info!("Loading embedding model");
                let model = self.loader.load().await.map_err(|e| match e {
                    KbError::ModelUnavailable(_) => e,
                    other => KbError::ModelUnavailable(other.to_string()),
                })?;
                if model.dimension() == 0 {
                    return Err(KbError::ModelUnavailable(format!(
                        "model {} reports zero dimensions",
                        model.name()
                    )));
                }
                Ok(model)
            })
            .await
    }

    #[inline]
    pub async fn dimension(&self) -> Result<usize> {
        Ok(self.model().await?.dimension())
    }

    #[inline]
    pub async fn model_name(&self) -> Result<String> {
        Ok(self.model().await?.name().to_string())
    }

    /// Embeds a batch of texts.
    ///
    /// Every returned vector is checked against the model's dimension.
    #[inline]
    pub async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model().await?;
        debug!("Encoding {} texts with {}", texts.len(), model.name());

        let vectors = if model.supports_concurrent_inference() {
            model.embed(texts).await?
        } else {
            let _guard = self.inference_lock.lock().await;
            model.embed(texts).await?
        };

        if vectors.len() != texts.len() {
            return Err(KbError::Embedding(format!(
                "model returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }

        let expected = model.dimension();
        for vector in &vectors {
            if vector.len() != expected {
                return Err(KbError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(KbError::Embedding(
                    "model returned a non-finite value".to_string(),
                ));
            }
        }

        Ok(vectors)
    }

    #[inline]
    pub async fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        self.encode(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| KbError::Embedding("model returned no vector".to_string()))
    }
}

struct PreloadedModel(Arc<dyn EmbeddingModel>);

#[async_trait]
impl ModelLoader for PreloadedModel {
    async fn load(&self) -> Result<Arc<dyn EmbeddingModel>> {
        Ok(Arc::clone(&self.0))
    }
}
