//! HTTP agent client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Agent, AgentContext, AgentError, AgentFailureCause, AgentOutput};

/// Agent reached over HTTP: `POST {url}` with `{ prompt, context }`.
#[derive(Clone)]
pub struct HttpAgent {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

#[derive(Serialize)]
struct InvokeRequest<'a> {
    prompt: &'a str,
    context: &'a AgentContext,
}

/// Error body shape: `{ "error": "..." }`.
#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

impl HttpAgent {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Agent for HttpAgent {
    #[instrument(skip(self, prompt, context), fields(correlation_id = %context.correlation_id))]
    async fn invoke(
        &self,
        prompt: &str,
        context: &AgentContext,
    ) -> Result<AgentOutput, AgentError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&InvokeRequest { prompt, context })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let cause = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .map(|body| AgentFailureCause { error: body.error });
            return Err(AgentError::Rejected {
                message: format!("HTTP {}", status.as_u16()),
                cause,
            });
        }

        let output: AgentOutput = resp
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;

        debug!(output_len = output.output.len(), "Agent answered");
        Ok(output)
    }
}
