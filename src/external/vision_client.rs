//! SPDX-License-Identifier: GPL-3.0-or-later

//! HTTPS client for the external vision model. Builds an
//! `https_only(true)` `reqwest::Client`, validates the endpoint scheme
//! before sending, and authenticates with `.bearer_auth(...)`; the async
//! client is used throughout since classification calls run concurrently
//! under a semaphore.

use crate::config::VisionModelConfig;
use crate::external::model_registry::{resolve_token_param, TokenParamName};
use crate::external::retry::FailureKind;
use crate::types::ActivityLabel;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The five labels a vision response is validated against.
const VALID_LABELS: [&str; 5] = ["digging", "swing_to_dump", "dumping", "swing_to_dig", "idle"];

#[derive(Debug, Serialize)]
struct VisionRequest<'a> {
    system_prompt: &'a str,
    user_message: String,
    image_base64: &'a str,
    model: &'a str,
    #[serde(flatten)]
    token_param: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct VisionResponse {
    label: Option<String>,
    confidence: Option<f32>,
    #[serde(default)]
    note: Option<String>,
}

/// A validated classification result from one vision-model call.
pub struct VisionResult {
    pub label: ActivityLabel,
    pub confidence: f32,
    pub note: Option<String>,
}

/// Ensures the configured endpoint is HTTPS before any request is sent.
fn validate_https_endpoint(endpoint: &str) -> anyhow::Result<()> {
    let url = reqwest::Url::parse(endpoint)?;
    if url.scheme() != "https" {
        anyhow::bail!("vision endpoint must be https, got scheme {:?}", url.scheme());
    }
    Ok(())
}

pub struct VisionClient {
    http: reqwest::Client,
    config: VisionModelConfig,
    token_param: TokenParamName,
    system_prompt: String,
}

impl VisionClient {
    pub fn new(config: VisionModelConfig, system_prompt: String) -> anyhow::Result<Self> {
        validate_https_endpoint(&config.endpoint)?;
        let token_param = resolve_token_param(&config.model);
        let http = reqwest::Client::builder()
            .https_only(true)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(VisionClient {
            http,
            config,
            token_param,
            system_prompt,
        })
    }

    fn bearer_token(&self) -> Option<String> {
        self.config
            .api_key_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    /// Sends one frame for classification. Returns `Ok` with a validated
    /// [`VisionResult`] plus a [`FailureKind`] classification on error so
    /// the caller's retry loop can decide whether to retry.
    pub async fn classify_frame(
        &self,
        image_bytes: &[u8],
        prev_label: Option<ActivityLabel>,
    ) -> Result<VisionResult, (anyhow::Error, FailureKind)> {
        let user_message = match prev_label {
            Some(l) => format!("Previous frame label: {l}"),
            None => "Previous frame label: (none)".to_string(),
        };
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image_bytes);

        let mut token_param = serde_json::Map::new();
        if let Some(limit) = self.config.max_output_tokens {
            token_param.insert(self.token_param.as_str().to_string(), serde_json::json!(limit));
        }

        let body = VisionRequest {
            system_prompt: &self.system_prompt,
            user_message,
            image_base64: &image_base64,
            model: &self.config.model,
            token_param: serde_json::Value::Object(token_param),
            temperature: self.config.temperature,
        };

        let mut req = self.http.post(&self.config.endpoint).json(&body);
        if let Some(token) = self.bearer_token() {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| {
            let kind = if e.is_timeout() || e.is_connect() {
                FailureKind::Transient
            } else {
                FailureKind::Permanent
            };
            (anyhow::Error::from(e), kind)
        })?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err((
                anyhow::anyhow!("vision model returned {status}"),
                FailureKind::Transient,
            ));
        }
        if !status.is_success() {
            return Err((
                anyhow::anyhow!("vision model returned {status}"),
                FailureKind::Permanent,
            ));
        }

        let parsed: VisionResponse = resp
            .json()
            .await
            .map_err(|e| (anyhow::Error::from(e), FailureKind::Permanent))?;

        validate_vision_response(parsed).map_err(|e| (e, FailureKind::Permanent))
    }
}

/// Validates a raw vision response against the fixed label set and
/// confidence range. Any deviation is a soft failure from the caller's
/// point of view, reported back as an `Err` here so the classifier
/// stage can produce a failure Classification.
fn validate_vision_response(resp: VisionResponse) -> anyhow::Result<VisionResult> {
    let label_str = resp
        .label
        .ok_or_else(|| anyhow::anyhow!("vision response missing label"))?;
    let confidence = resp
        .confidence
        .ok_or_else(|| anyhow::anyhow!("vision response missing confidence"))?;

    if !VALID_LABELS.contains(&label_str.as_str()) {
        anyhow::bail!("vision response had unknown label {label_str:?}");
    }
    if !(0.0..=1.0).contains(&confidence) {
        anyhow::bail!("vision response confidence {confidence} out of range");
    }

    Ok(VisionResult {
        label: ActivityLabel::from_model_label(&label_str),
        confidence,
        note: resp.note,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_label() {
        let resp = VisionResponse {
            label: Some("bulldozing".into()),
            confidence: Some(0.9),
            note: None,
        };
        assert!(validate_vision_response(resp).is_err());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let resp = VisionResponse {
            label: Some("digging".into()),
            confidence: Some(1.5),
            note: None,
        };
        assert!(validate_vision_response(resp).is_err());
    }

    #[test]
    fn accepts_valid_response() {
        let resp = VisionResponse {
            label: Some("digging".into()),
            confidence: Some(0.8),
            note: None,
        };
        let result = validate_vision_response(resp).unwrap();
        assert_eq!(result.label, ActivityLabel::Digging);
    }

    #[test]
    fn http_endpoint_is_rejected() {
        assert!(validate_https_endpoint("http://models.example.com/v1/vision").is_err());
    }

    #[test]
    fn https_endpoint_is_accepted() {
        assert!(validate_https_endpoint("https://models.example.com/v1/vision").is_ok());
    }
}
