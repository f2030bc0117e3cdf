//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps prompt submission, history and queue inspection, system stats,
//! the node catalogue and interruption using [`reqwest`].

use std::collections::HashSet;
use std::future::Future;

use serde::Deserialize;

use crate::messages::{parse_history, HistoryEntry, PromptRejection, QueueSnapshot, SystemStats};

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Id used to track the job in `/history` and `/queue`.
    pub prompt_id: String,
    /// Queue number assigned by the server.
    #[serde(default)]
    pub number: i64,
    /// Validation errors on nodes the server chose to skip.
    #[serde(default)]
    pub node_errors: serde_json::Map<String, serde_json::Value>,
}

/// Failures talking to a ComfyUI server.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// Transport failure before any status was received.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx status.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        status: u16,
        body: String,
    },

    /// `POST /prompt` was refused with a structured validation error.
    #[error("Prompt rejected: {0}")]
    PromptRejected(PromptRejection),

    /// The response body did not have the expected shape.
    #[error("Unexpected response from {endpoint}: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ComfyUIApiError {
    /// Connection-level failure that a retry might fix.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect() || e.is_timeout(),
            Self::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn base_url(&self) -> &str {
        &self.api_url
    }

    /// Submit an API-format prompt for execution.
    ///
    /// Sends `POST /prompt` with the prompt and client ID. A 400 response
    /// carrying a validation body becomes [`ComfyUIApiError::PromptRejected`].
    pub async fn submit_prompt(
        &self,
        prompt: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": prompt,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        match Self::ensure_success(response).await {
            Ok(response) => Ok(response.json::<SubmitResponse>().await?),
            Err(ComfyUIApiError::ApiError { status, body }) => match PromptRejection::parse(&body) {
                Some(rejection) => Err(ComfyUIApiError::PromptRejected(rejection)),
                None => Err(ComfyUIApiError::ApiError { status, body }),
            },
            Err(e) => Err(e),
        }
    }

    /// Delete a pending prompt from the queue.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Interrupt whatever is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .post(format!("{}/interrupt", self.api_url))
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Retrieve the history entry for a prompt. `None` until the prompt
    /// has finished (successfully or not).
    pub async fn get_history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        let body: serde_json::Value = Self::parse_response(response).await?;
        parse_history(prompt_id, body).map_err(|source| ComfyUIApiError::Decode {
            endpoint: "/history",
            source,
        })
    }

    /// Snapshot of running and pending prompts.
    pub async fn get_queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/queue", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    pub async fn system_stats(&self) -> Result<SystemStats, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Node class names the server has installed (`GET /object_info`).
    pub async fn object_info(&self) -> Result<HashSet<String>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/object_info", self.api_url))
            .send()
            .await?;

        let catalogue: serde_json::Map<String, serde_json::Value> =
            Self::parse_response(response).await?;
        Ok(catalogue.into_iter().map(|(k, _)| k).collect())
    }

    // ---- response handling ----

    /// Pass 2xx responses through; anything else becomes
    /// [`ComfyUIApiError::ApiError`] carrying the body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Decode a 2xx JSON body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// The two queries job tracking needs. Implemented by [`ComfyUIApi`];
/// tests substitute a scripted backend.
pub trait JobBackend: Sync {
    fn queue(&self) -> impl Future<Output = Result<QueueSnapshot, ComfyUIApiError>> + Send;

    fn history(
        &self,
        prompt_id: &str,
    ) -> impl Future<Output = Result<Option<HistoryEntry>, ComfyUIApiError>> + Send;
}

impl JobBackend for ComfyUIApi {
    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        self.get_queue().await
    }

    async fn history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        self.get_history(prompt_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let api = ComfyUIApi::new("http://localhost:8188/");
        assert_eq!(api.base_url(), "http://localhost:8188");
    }

    #[test]
    fn server_errors_are_transient() {
        let e = ComfyUIApiError::ApiError { status: 502, body: String::new() };
        assert!(e.is_transient());
        let e = ComfyUIApiError::ApiError { status: 400, body: String::new() };
        assert!(!e.is_transient());
    }

    #[test]
    fn submit_response_tolerates_missing_number() {
        let r: SubmitResponse = serde_json::from_str(r#"{"prompt_id": "abc"}"#).unwrap();
        assert_eq!(r.prompt_id, "abc");
        assert_eq!(r.number, 0);
        assert!(r.node_errors.is_empty());
    }
}
