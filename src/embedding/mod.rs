//! Pluggable embedding abstraction.
//!
//! Three interchangeable variants sit behind the `Embedder` trait: `none`
//! (keyword fallback only), `local` (deterministic, in-process, no network),
//! and `external-http` (a configurable OpenAI-compatible HTTP endpoint).
//! Grounded on the teacher's `embedding::Embedder` trait and
//! `create_embedder(config)` factory, generalized into a runtime-registerable
//! provider map rather than a fixed match on a `model` string.

pub mod http;
pub mod local;
pub mod none;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EmbeddingProviderConfig;
use crate::error::Result;

/// A provider of dense text embeddings.
pub trait Embedder: Send + Sync {
    /// Embed a single piece of text.
    fn embed(&self, text: &str) -> Result<Option<Vec<f32>>>;

    /// Embed a batch of texts. The default implementation embeds each
    /// text independently; providers with a native batch endpoint
    /// should override this.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Output vector width, or 0 for the `none` provider.
    fn dimensions(&self) -> usize;

    /// A short identifier for logging/diagnostics.
    fn model_name(&self) -> &str;
}

/// Cosine similarity between two vectors of equal length. Returns 0.0 for
/// empty or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

type ProviderConstructor = Arc<dyn Fn(&EmbeddingProviderConfig) -> Result<Arc<dyn Embedder>> + Send + Sync>;

/// Runtime-registerable construction of embedders from a config value.
/// Hosts embedding a custom provider variant can register it here before
/// constructing a `MeshOrchestrator`; this crate registers its own three
/// built-in variants by default.
pub struct EmbedderRegistry {
    constructors: HashMap<&'static str, ProviderConstructor>,
}

impl EmbedderRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            constructors: HashMap::new(),
        };
        registry.register("none", |_| Ok(Arc::new(none::NoneEmbedder) as Arc<dyn Embedder>));
        registry.register("local", |config| match config {
            EmbeddingProviderConfig::Local { dimensions } => {
                Ok(Arc::new(local::LocalEmbedder::new(*dimensions)) as Arc<dyn Embedder>)
            }
            _ => Ok(Arc::new(local::LocalEmbedder::new(256)) as Arc<dyn Embedder>),
        });
        #[cfg(feature = "http-embeddings")]
        registry.register("external_http", |config| match config {
            EmbeddingProviderConfig::ExternalHttp {
                endpoint,
                api_key,
                model,
                dimensions,
            } => Ok(Arc::new(http::HttpEmbedder::new(
                endpoint.clone(),
                api_key.clone(),
                model.clone(),
                *dimensions,
            )?) as Arc<dyn Embedder>),
            _ => Err(crate::error::MeshError::Config(
                "external_http provider requires ExternalHttp config".to_string(),
            )),
        });
        #[cfg(not(feature = "http-embeddings"))]
        registry.register("external_http", |_| {
            Err(crate::error::MeshError::Config(
                "this build was compiled without the http-embeddings feature".to_string(),
            ))
        });
        registry
    }

    pub fn register<F>(&mut self, name: &'static str, constructor: F)
    where
        F: Fn(&EmbeddingProviderConfig) -> Result<Arc<dyn Embedder>> + Send + Sync + 'static,
    {
        self.constructors.insert(name, Arc::new(constructor));
    }

    /// Construct the embedder named by `config`'s variant.
    pub fn build(&self, config: &EmbeddingProviderConfig) -> Result<Arc<dyn Embedder>> {
        let key = match config {
            EmbeddingProviderConfig::None => "none",
            EmbeddingProviderConfig::Local { .. } => "local",
            EmbeddingProviderConfig::ExternalHttp { .. } => "external_http",
        };
        let constructor = self.constructors.get(key).ok_or_else(|| {
            crate::error::MeshError::Config(format!("no embedding provider registered for '{key}'"))
        })?;
        constructor(config)
    }
}

impl Default for EmbedderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience wrapper used throughout the orchestrator: builds the
/// default registry and constructs the embedder named by `config` in one
/// call.
pub fn create_embedder(config: &EmbeddingProviderConfig) -> Result<Arc<dyn Embedder>> {
    EmbedderRegistry::new().build(config)
}
