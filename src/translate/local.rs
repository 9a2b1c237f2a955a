use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{clean_translation_response, ensure_parity, status_error, strip_code_fence, Translator};
use crate::error::{Result, VideoToolError};
use crate::language;
use crate::subtitle::Segment;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub text: String,
}

/// Local translation through an ollama model, one segment per request.
pub struct LocalTranslator {
    client: Client,
    endpoint: String,
    model: String,
}

impl LocalTranslator {
    pub fn new(client: Client, endpoint: String, model: String) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
        }
    }

    fn build_prompt(text: &str, source_lang: &str, target_lang: &str) -> String {
        let target_name = language::display_name(target_lang);
        format!(
            "You are a professional subtitle translator.\n\
             \n\
             Translate the {} text below to {} ONLY (language code: {}).\n\
             Return ONLY the translation in JSON format as {{\"text\":\"your {} translation here\"}}.\n\
             Do not include any explanations, alternatives, or text in other languages.\n\
             \n\
             Text to translate: \"{}\"\n",
            language::display_name(source_lang),
            target_name,
            target_lang,
            target_name,
            text
        )
    }

    async fn translate_text(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: Self::build_prompt(text, source_lang, target_lang),
            stream: false,
            format: "json".to_string(),
        };

        let url = format!("{}/api/generate", self.endpoint);
        debug!("Sending translation request to: {}", url);

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let generated: GenerateResponse = response.json().await.map_err(|e| {
            VideoToolError::transient_translation(format!("Failed to parse response: {}", e))
        })?;

        parse_generated(&generated.response)
    }
}

/// Extract the translation from the model's `response` field.
fn parse_generated(raw: &str) -> Result<String> {
    let raw = strip_code_fence(raw);
    debug!("Raw ollama response: {}", raw);

    if raw.is_empty() {
        return Err(VideoToolError::transient_translation("Empty translation received"));
    }

    if let Ok(result) = serde_json::from_str::<TranslationResult>(raw) {
        return Ok(result.text.trim().to_string());
    }

    Ok(clean_translation_response(raw))
}

#[async_trait]
impl Translator for LocalTranslator {
    async fn translate(
        &self,
        segments: &[Segment],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<Segment>> {
        info!(
            "Translating {} segments ({} -> {}) with local model {}",
            segments.len(),
            source_lang,
            target_lang,
            self.model
        );

        let mut texts = Vec::with_capacity(segments.len());
        for (idx, segment) in segments.iter().enumerate() {
            texts.push(self.translate_text(&segment.text, source_lang, target_lang).await?);
            if (idx + 1) % 10 == 0 || idx + 1 == segments.len() {
                info!("  Translated {}/{} segments", idx + 1, segments.len());
            }
        }

        ensure_parity(segments, texts)
    }
}
