use std::time::Duration;

use async_trait::async_trait;

use super::{ControlAction, ControlError, ControlExecutor, ControlResult};

/// Sends control actions as JSON to `<base_url>/actions`.
pub struct HttpControlExecutor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpControlExecutor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ControlError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControlError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/actions", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ControlExecutor for HttpControlExecutor {
    async fn execute_action(&self, action: ControlAction) -> Result<ControlResult, ControlError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&action)
            .send()
            .await
            .map_err(|e| ControlError(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(1024)
                .collect::<String>();
            return Err(ControlError(format!("HTTP {}: {body}", status.as_u16())));
        }

        resp.json::<ControlResult>()
            .await
            .map_err(|e| ControlError(format!("invalid response body: {e}")))
    }
}
