//! Delivers one submission to the server over HTTP, wrapped by the C3
//! retry/backoff policy from `csf-retry`.
//!
//! Grounds `csf_retry::TransportError` classification in real response
//! handling: a `409` (duplicate submission id) is not an error at all —
//! the client treats it as terminal success (spec.md §7, scenario 4).

use csf_retry::{send_with_retry, RetryConfig, RetryOutcome, TransportError};
use csf_types::Submission;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct DeliveryTarget {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub client: reqwest::Client,
}

impl DeliveryTarget {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builder should not fail with a plain timeout");
        Self {
            endpoint: endpoint.into(),
            api_key,
            client,
        }
    }

    fn submit_url(&self) -> String {
        format!("{}/api/v1/compliance/submit", self.endpoint.trim_end_matches('/'))
    }

    async fn attempt(&self, submission: &Submission) -> Result<(), TransportError> {
        let mut req = self.client.post(self.submit_url()).json(submission);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(TransportError::from)?;
        let status = response.status();

        if status.is_success() || status.as_u16() == 409 {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

/// Attempt delivery of one submission, honoring `config`'s retry/backoff
/// policy (spec.md §4.C3).
pub async fn deliver(
    cancel: &CancellationToken,
    config: &RetryConfig,
    target: &DeliveryTarget,
    submission: &Submission,
) -> RetryOutcome {
    send_with_retry(cancel, config, |_attempt| target.attempt(submission)).await
}
