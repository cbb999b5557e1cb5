// src/pipeline/publisher.rs
//
// Persistence boundary for finalized violations: uploads the artifact
// image to object storage (upload returns an opaque URL), then upserts
// the violation record keyed by plate identity. Transient network
// failures get bounded retries with exponential backoff; a 4xx response
// is a contract violation and is never retried.

use crate::config::PublisherConfig;
use anyhow::{anyhow, Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Record shape expected by the violations API. The store upserts by
/// `number_plate`; status transitions happen only through the store's
/// own update contract.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationRecord {
    pub number_plate: String,
    pub violation_type: String,
    pub violation_description: String,
    pub image_url: String,
    pub violation_timestamp: String,
    pub confidence_score: f32,
    pub vehicle_id: String,
    pub crop_filename: String,
    pub no_helmet_count: u32,
    pub location: String,
    pub camera_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
struct UploadRequest {
    key: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

enum AttemptError {
    /// Network failure or server-side error -- worth retrying
    Transient(anyhow::Error),
    /// The request itself is wrong -- retrying cannot help
    Permanent(anyhow::Error),
}

fn status_is_retryable(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
}

pub struct PersistencePublisher {
    http_client: reqwest::Client,
    config: PublisherConfig,
}

impl PersistencePublisher {
    pub fn new(config: PublisherConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            config,
        })
    }

    /// Upload image bytes under a storage key. Returns the opaque URL.
    pub async fn upload_image(&self, jpeg: &[u8], key: &str) -> Result<String> {
        let request = UploadRequest {
            key: key.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(jpeg),
        };
        let url = format!("{}/upload", self.config.storage_url.trim_end_matches('/'));

        let client = &self.http_client;
        let request = &request;
        let url = &url;
        self.with_retry("upload", move || async move {
            let response = client
                .post(url.as_str())
                .json(request)
                .send()
                .await
                .map_err(|e| AttemptError::Transient(anyhow!("Upload request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let err = anyhow!("Storage returned {}: {}", status, body);
                return Err(if status_is_retryable(status) {
                    AttemptError::Transient(err)
                } else {
                    AttemptError::Permanent(err)
                });
            }

            let parsed: UploadResponse = response
                .json()
                .await
                .map_err(|e| AttemptError::Transient(anyhow!("Bad upload response: {}", e)))?;
            Ok(parsed.url)
        })
        .await
    }

    /// Upsert a violation record by plate identity.
    pub async fn upsert_violation(&self, record: &ViolationRecord) -> Result<()> {
        let url = format!("{}/api/violations", self.config.api_url.trim_end_matches('/'));

        let client = &self.http_client;
        let url = &url;
        self.with_retry("upsert", move || async move {
            let response = client
                .post(url.as_str())
                .json(record)
                .send()
                .await
                .map_err(|e| AttemptError::Transient(anyhow!("Upsert request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let err = anyhow!("Violations API returned {}: {}", status, body);
                return Err(if status_is_retryable(status) {
                    AttemptError::Transient(err)
                } else {
                    AttemptError::Permanent(err)
                });
            }
            Ok(())
        })
        .await?;

        info!("✓ Violation upserted for plate {}", record.number_plate);
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, AttemptError>>,
    {
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let mut tries = 0u32;

        loop {
            tries += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Permanent(e)) => {
                    return Err(e.context(format!("{} rejected", what)));
                }
                Err(AttemptError::Transient(e)) => {
                    if tries > self.config.max_retries {
                        return Err(e.context(format!(
                            "{} failed after {} attempts",
                            what, tries
                        )));
                    }
                    warn!("{} attempt {} failed ({}), retrying in {:?}", what, tries, e, backoff);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_status_triage() {
        // Server-side errors are transient, client errors are not
        assert!(status_is_retryable(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        assert!(status_is_retryable(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!status_is_retryable(reqwest::StatusCode::BAD_REQUEST));
        assert!(!status_is_retryable(reqwest::StatusCode::NOT_FOUND));
        assert!(!status_is_retryable(reqwest::StatusCode::UNPROCESSABLE_ENTITY));
    }

    #[test]
    fn test_record_serializes_store_fields() {
        let record = ViolationRecord {
            number_plate: "KA01CD5678".to_string(),
            violation_type: "no_helmet".to_string(),
            violation_description: "Rider without helmet".to_string(),
            image_url: "https://storage/abc.jpg".to_string(),
            violation_timestamp: "2024-04-25T10:00:00Z".to_string(),
            confidence_score: 0.6,
            vehicle_id: "7".to_string(),
            crop_filename: "violation_vehicle_1_ID7_300x500_conf0.60.jpg".to_string(),
            no_helmet_count: 2,
            location: String::new(),
            camera_id: "cam-01".to_string(),
            status: "active".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["number_plate"], "KA01CD5678");
        assert_eq!(json["no_helmet_count"], 2);
        assert_eq!(json["status"], "active");
    }
}
