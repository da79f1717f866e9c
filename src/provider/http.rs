//! HTTP adapter for OpenAI-compatible provider endpoints.
//!
//! Speaks the `/chat/completions` wire format so any LiteLLM-compatible
//! gateway can sit behind a [`ProviderClient`](super::ProviderClient).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CallParams, CallResponse, ProviderClient};
use crate::error::ProviderError;

/// Client for OpenAI-compatible chat completion APIs.
pub struct HttpProviderClient {
    /// Base URL for the API.
    base_url: String,
    /// Optional API key for authentication.
    api_key: Option<String>,
    /// HTTP client for making API requests.
    http_client: Client,
}

impl HttpProviderClient {
    /// Creates a new HTTP provider client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL for the API (e.g., "https://api.openai.com/v1")
    /// * `api_key` - Optional API key for bearer authentication
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            http_client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if an API key is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }
}

/// Internal request structure for the OpenAI-compatible API.
#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

/// Internal response structure from the OpenAI-compatible API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    total_tokens: u32,
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn call(
        &self,
        prompt: &str,
        model: &str,
        params: &CallParams,
    ) -> Result<CallResponse, ProviderError> {
        let api_request = ApiRequest {
            model,
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);

        let http_response = self
            .authorize(self.http_client.post(&url))
            .header("Content-Type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            // Prefer the structured error message when the body parses.
            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|r| r.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(ProviderError::RateLimited(message));
            }

            return Err(ProviderError::ApiError {
                code: status_code,
                message,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::ParseError("No choices in API response".to_string()))?;

        Ok(CallResponse {
            content,
            tokens_used: api_response.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }

    async fn ping(&self) -> Result<(), ProviderError> {
        let url = format!("{}/models", self.base_url);

        let response = self
            .authorize(self.http_client.get(&url))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ApiError {
                code: status.as_u16(),
                message: format!("liveness probe returned {}", status),
            });
        }
        Ok(())
    }
}
