//! Remote face verifier: the single outbound multipart submission.

use async_trait::async_trait;
use facegate_core::payload::SubmissionPayload;
use facegate_core::{SubmissionError, VerifierResponse};
use reqwest::multipart;
use std::time::Duration;

/// Delivers a packaged burst to whatever decides whether it is live and matches.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn submit(&self, payload: SubmissionPayload) -> Result<VerifierResponse, SubmissionError>;

    fn name(&self) -> &str;
}

/// Verifier reached over HTTP as `multipart/form-data`.
pub struct HttpVerifier {
    base_url: String,
    client: reqwest::Client,
}

impl HttpVerifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SubmissionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubmissionError::NetworkFailure(format!("failed to create HTTP client: {e}")))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::info!(base_url = %base_url, ?timeout, "HTTP verifier initialized");
        Ok(Self { base_url, client })
    }

    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn build_form(payload: SubmissionPayload) -> Result<multipart::Form, SubmissionError> {
        let mut form = multipart::Form::new();
        for (name, value) in payload.fields {
            form = form.text(name, value);
        }
        for file in payload.files {
            let part = multipart::Part::bytes(file.data)
                .file_name(file.file_name)
                .mime_str(&file.content_type)
                .map_err(|e| SubmissionError::InvalidPayload(e.to_string()))?;
            form = form.part(file.field, part);
        }
        Ok(form)
    }
}

#[async_trait]
impl Verifier for HttpVerifier {
    async fn submit(&self, payload: SubmissionPayload) -> Result<VerifierResponse, SubmissionError> {
        let url = self.url_for(&payload.endpoint);
        let frames = payload.frame_parts();
        let form = Self::build_form(payload)?;

        tracing::info!(url = %url, frames, "submitting burst");

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        let body = resp.text().await.map_err(classify)?;
        let parsed = serde_json::from_str::<VerifierResponse>(&body);

        if !status.is_success() {
            let reason = parsed
                .ok()
                .and_then(|r| r.reason())
                .unwrap_or_else(|| format!("HTTP {status}"));
            tracing::warn!(%status, reason = %reason, "verifier rejected burst");
            return Err(SubmissionError::ServerRejected(reason));
        }

        parsed.map_err(|e| SubmissionError::InvalidResponse(e.to_string()))
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn classify(e: reqwest::Error) -> SubmissionError {
    if e.is_timeout() {
        SubmissionError::Timeout
    } else {
        SubmissionError::NetworkFailure(e.to_string())
    }
}
