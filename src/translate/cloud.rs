use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ensure_parity, numbered_lines, parse_numbered_lines, status_error, Translator};
use crate::error::{Result, VideoToolError};
use crate::language;
use crate::subtitle::Segment;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Claude through the Anthropic Messages API.
///
/// Segments go out in batches as numbered lines and come back the same way,
/// which keeps one request per batch while preserving alignment.
pub struct CloudTranslator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    batch_size: usize,
}

impl CloudTranslator {
    pub fn new(
        client: Client,
        endpoint: String,
        model: String,
        api_key: String,
        max_tokens: u32,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            api_key,
            max_tokens,
            batch_size: batch_size.max(1),
        }
    }

    fn build_prompt(batch: &[Segment], source_lang: &str, target_lang: &str) -> String {
        format!(
            "Translate the following {} movie subtitle lines to {}.\n\
             Preserve the meaning, tone, and natural flow; keep each line concise.\n\
             Every line starts with a tag like [0]. Reply with exactly one line per input line, \
             in the form \"[n] translation\", keeping the tags. Do not merge or split lines.\n\
             \n\
             {}\n\
             \n\
             Provide ONLY the tagged translations, no explanations.",
            language::display_name(source_lang),
            language::display_name(target_lang),
            numbered_lines(batch)
        )
    }

    async fn send(&self, prompt: String) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let url = format!("{}/v1/messages", self.endpoint);
        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body: MessagesResponse = response.json().await.map_err(|e| {
            VideoToolError::transient_translation(format!("Failed to parse API response: {}", e))
        })?;

        Ok(body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl Translator for CloudTranslator {
    async fn translate(
        &self,
        segments: &[Segment],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<Segment>> {
        info!(
            "Translating {} segments ({} -> {}) with {}",
            segments.len(),
            source_lang,
            target_lang,
            self.model
        );

        let mut texts = Vec::with_capacity(segments.len());
        for batch in segments.chunks(self.batch_size) {
            let reply = self
                .send(Self::build_prompt(batch, source_lang, target_lang))
                .await?;
            debug!("Raw API reply: {}", reply);

            texts.extend(parse_numbered_lines(&reply, batch.len())?);
            info!("  Translated {}/{} segments", texts.len(), segments.len());
        }

        ensure_parity(segments, texts)
    }
}
