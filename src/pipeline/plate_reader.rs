// src/pipeline/plate_reader.rs
//
// License plate text recognition over an ordered list of backend model
// variants. Each attempt posts the enhanced image to a Gemini-style
// generateContent endpoint; a transient failure (HTTP error, timeout,
// malformed body) falls through to the next variant. An explicit
// "unreadable" answer is a completed read -- the validator rejects it
// downstream -- and does not consume further variants.

use crate::config::RecognitionConfig;
use anyhow::{bail, Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const PLATE_READING_PROMPT: &str = "Look at this image and extract ONLY the number plate text. \
Return the text exactly as you see it on the number plate. \
If you cannot read the number plate clearly, return \"unreadable\". \
Do not include any other information or analysis.";

pub const UNREADABLE: &str = "unreadable";

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// A completed recognition attempt.
#[derive(Debug, Clone)]
pub struct PlateRead {
    pub text: String,
    pub backend: String,
}

pub struct PlateReader {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    models: Vec<String>,
}

impl PlateReader {
    pub fn new(config: &RecognitionConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} is not set", config.api_key_env))?;
        if config.models.is_empty() {
            bail!("No recognition backend models configured");
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            models: config.models.clone(),
        })
    }

    /// Attempt recognition through the backend variants in order.
    /// Errors only when every variant fails.
    pub async fn read(&self, jpeg: &[u8]) -> Result<PlateRead> {
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(jpeg);

        for model in &self.models {
            debug!("Trying recognition backend: {}", model);
            match self.try_model(model, &image_b64).await {
                Ok(text) => {
                    info!("Plate read via {}: '{}'", model, text);
                    return Ok(PlateRead {
                        text,
                        backend: model.clone(),
                    });
                }
                Err(e) => {
                    warn!("Backend {} failed: {}", model, e);
                }
            }
        }

        bail!("All recognition backends failed")
    }

    async fn try_model(&self, model: &str, image_b64: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.endpoint, model, self.api_key
        );

        let request = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart {
                        text: Some(PLATE_READING_PROMPT.to_string()),
                        inline_data: None,
                    },
                    RequestPart {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: image_b64.to_string(),
                        }),
                    },
                ],
            }],
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Recognition request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("HTTP {}: {}", status, body);
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .context("Failed to parse recognition response")?;

        let text = parsed
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts)
            .and_then(|p| p.into_iter().find_map(|part| part.text))
            .context("Recognition response had no text")?;

        Ok(cleanup_response(&text))
    }
}

/// Reduce a model answer to the plate line. An answer mentioning
/// "unreadable" stands as-is; otherwise the first line of plausible
/// length wins.
fn cleanup_response(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.to_lowercase().contains(UNREADABLE) {
        return UNREADABLE.to_string();
    }

    for line in trimmed.lines() {
        let line = line.trim();
        if line.len() > 3 {
            return line.to_string();
        }
    }

    UNREADABLE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_takes_first_plausible_line() {
        assert_eq!(cleanup_response("KA01CD5678"), "KA01CD5678");
        assert_eq!(cleanup_response("  MH 12 AB 1234  \n"), "MH 12 AB 1234");
        assert_eq!(
            cleanup_response("ok\nKA01CD5678\nextra commentary"),
            "KA01CD5678"
        );
    }

    #[test]
    fn test_cleanup_unreadable_sentinel() {
        assert_eq!(cleanup_response("The plate is Unreadable."), UNREADABLE);
        assert_eq!(cleanup_response("unreadable"), UNREADABLE);
    }

    #[test]
    fn test_cleanup_empty_and_noise() {
        assert_eq!(cleanup_response(""), UNREADABLE);
        assert_eq!(cleanup_response("a\nb\nc"), UNREADABLE);
    }
}
