// Translation adapters
//
// Two backends sit behind the `Translator` trait, selected once per run:
// - Cloud: Claude through the Anthropic Messages API, batched
// - Local: an ollama model, one segment per request
//
// Both must hand back exactly one translated segment per input segment with
// the input timings; `ensure_parity` enforces that at the boundary.

pub mod cloud;
pub mod common;
pub mod local;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use common::*;
use crate::config::TranslationBackend;
use crate::error::{Result, VideoToolError};
use crate::subtitle::Segment;

/// Machine translation engine.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `segments` from `source_lang` to `target_lang`, keeping count
    /// and timing.
    async fn translate(
        &self,
        segments: &[Segment],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<Segment>>;
}

/// Factory for creating translator instances
pub struct TranslatorFactory;

impl TranslatorFactory {
    pub fn create(backend: &TranslationBackend, timeout: Duration) -> Result<Arc<dyn Translator>> {
        let client = build_client(timeout)?;
        let translator: Arc<dyn Translator> = match backend {
            TranslationBackend::Cloud {
                endpoint,
                model,
                api_key,
                max_tokens,
                batch_size,
            } => Arc::new(cloud::CloudTranslator::new(
                client,
                endpoint.clone(),
                model.clone(),
                api_key.clone(),
                *max_tokens,
                *batch_size,
            )),
            TranslationBackend::Local { endpoint, model } => {
                Arc::new(local::LocalTranslator::new(client, endpoint.clone(), model.clone()))
            }
        };
        Ok(translator)
    }
}

/// Attach translated texts to the source timings, one to one.
pub fn ensure_parity(source: &[Segment], translated: Vec<String>) -> Result<Vec<Segment>> {
    if source.len() != translated.len() {
        return Err(VideoToolError::transient_translation(format!(
            "translator returned {} segments for {} inputs",
            translated.len(),
            source.len()
        )));
    }

    Ok(source
        .iter()
        .zip(translated)
        .map(|(segment, text)| Segment {
            start: segment.start,
            end: segment.end,
            text,
        })
        .collect())
}
