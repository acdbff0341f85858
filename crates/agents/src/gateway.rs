//! The single path every agent takes to the model.
//!
//! The gateway resolves the model through the [`ModelRouter`], applies the
//! per-call timeout, races the job's cancellation token, and validates the
//! returned JSON against the caller's strict schema type. Agents never touch
//! [`LlmClient`] directly.

use std::sync::Arc;
use std::time::Duration;

use pipeline::{LlmClient, LlmRequest, ModelRouter, Stage, StageError};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::prompts::Prompt;

pub struct LlmGateway {
    client: Arc<dyn LlmClient>,
    router: ModelRouter,
    call_timeout: Duration,
}

impl LlmGateway {
    pub fn new(client: Arc<dyn LlmClient>, router: ModelRouter, call_timeout: Duration) -> Self {
        Self {
            client,
            router,
            call_timeout,
        }
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    /// Invokes the model for `stage` and decodes the reply as `T`.
    ///
    /// A reply that does not match `T` is a provider error: the model
    /// answered, but not with what was asked for.
    #[instrument(skip(self, prompt, cancel), fields(stage = %stage))]
    pub async fn call<T: DeserializeOwned>(
        &self,
        stage: Stage,
        prompt: Prompt,
        cancel: &CancellationToken,
    ) -> Result<T, StageError> {
        let tier = self.router.tier_for_stage(stage, None);
        let request = LlmRequest {
            stage,
            model: self.router.get_model_for_stage(stage, None),
            tier,
            system: prompt.system,
            prompt: prompt.body,
            response_schema: prompt.schema.to_owned(),
            timeout: self.call_timeout,
        };
        debug!(model = %request.model, tier = %tier, "Invoking model");

        let value = tokio::select! {
            _ = cancel.cancelled() => return Err(StageError::Cancelled),
            outcome = tokio::time::timeout(self.call_timeout, self.client.invoke(request)) => {
                match outcome {
                    Err(_) => return Err(StageError::Timeout { after: self.call_timeout }),
                    Ok(result) => result?,
                }
            }
        };

        serde_json::from_value(value).map_err(|e| StageError::Provider {
            message: format!("{stage} response did not match the expected schema: {e}"),
            retry_after: None,
        })
    }
}
