//! No-op embedder: relevance falls back entirely to keyword overlap.

use crate::embedding::Embedder;
use crate::error::Result;

pub struct NoneEmbedder;

impl Embedder for NoneEmbedder {
    fn embed(&self, _text: &str) -> Result<Option<Vec<f32>>> {
        Ok(None)
    }

    fn dimensions(&self) -> usize {
        0
    }

    fn model_name(&self) -> &str {
        "none"
    }
}
