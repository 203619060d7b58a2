//! SPDX-License-Identifier: GPL-3.0-or-later

//! HTTPS client for the optional narrative text-generation model. Shares
//! the HTTPS-only client shape used by [`crate::external::vision_client`];
//! validation here is lenient — any non-empty response is accepted and
//! embedded.

use crate::config::NarrativeModelConfig;
use crate::external::model_registry::{resolve_token_param, TokenParamName};
use crate::external::retry::FailureKind;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct NarrativeRequest<'a> {
    system_prompt: &'a str,
    structured_cycle_data: serde_json::Value,
    model: &'a str,
    #[serde(flatten)]
    token_param: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

pub struct TextClient {
    http: reqwest::Client,
    config: NarrativeModelConfig,
    token_param: TokenParamName,
    system_prompt: String,
}

impl TextClient {
    pub fn new(config: NarrativeModelConfig, system_prompt: String) -> anyhow::Result<Self> {
        let url = reqwest::Url::parse(&config.endpoint)?;
        if url.scheme() != "https" {
            anyhow::bail!("narrative endpoint must be https, got scheme {:?}", url.scheme());
        }
        let token_param = resolve_token_param(&config.model);
        let http = reqwest::Client::builder()
            .https_only(true)
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(TextClient {
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

    /// Requests a prose analysis of the structured cycle data. Any
    /// non-empty response body is accepted verbatim.
    pub async fn generate_narrative(
        &self,
        structured_cycle_data: serde_json::Value,
    ) -> Result<String, (anyhow::Error, FailureKind)> {
        let mut token_param = serde_json::Map::new();
        if let Some(limit) = self.config.max_output_tokens {
            token_param.insert(self.token_param.as_str().to_string(), serde_json::json!(limit));
        }

        let body = NarrativeRequest {
            system_prompt: &self.system_prompt,
            structured_cycle_data,
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
                anyhow::anyhow!("narrative model returned {status}"),
                FailureKind::Transient,
            ));
        }
        if !status.is_success() {
            return Err((
                anyhow::anyhow!("narrative model returned {status}"),
                FailureKind::Permanent,
            ));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| (anyhow::Error::from(e), FailureKind::Permanent))?;

        if text.trim().is_empty() {
            return Err((
                anyhow::anyhow!("narrative model returned an empty response"),
                FailureKind::Permanent,
            ));
        }

        Ok(text)
    }
}
