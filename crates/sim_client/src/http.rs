use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use shared::domain::{AgentOutcome, SimulationId, SimulationRequest};
use shared::protocol::{
    SimulationProgressResponse, SimulationResultsResponse, SubmitSimulationRequest,
    SubmitSimulationResponse,
};

use crate::RemoteJobService;

/// HTTP client for the persona simulation service.
pub struct HttpJobService {
    http: reqwest::Client,
    base_url: String,
}

impl HttpJobService {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl RemoteJobService for HttpJobService {
    async fn submit(&self, request: &SimulationRequest) -> Result<SimulationId> {
        let body = SubmitSimulationRequest {
            scenario: request.scenario.clone(),
            context: request.context.clone(),
            action_space: request.action_space.clone(),
            demographic_group: request.demographic_group.clone(),
            attributes_list: request.attributes.clone(),
        };

        let response = self
            .http
            .post(format!("{}/generate_persona", self.base_url))
            .json(&body)
            .send()
            .await
            .context("submission request failed")?;
        let status = response.status();
        let ack: SubmitSimulationResponse = response
            .json()
            .await
            .context("submission response was not valid JSON")?;

        if status != StatusCode::ACCEPTED {
            return Err(anyhow!(ack
                .message
                .unwrap_or_else(|| format!("submission rejected with status {status}"))));
        }
        match ack.simulation_id {
            Some(simulation_id) => Ok(SimulationId(simulation_id)),
            None => Err(anyhow!(ack
                .message
                .unwrap_or_else(|| "submission accepted without a simulation id".to_string()))),
        }
    }

    async fn fetch_progress(
        &self,
        simulation_id: &SimulationId,
    ) -> Result<SimulationProgressResponse> {
        // the service reports unknown ids through the status field of an
        // ordinary JSON body, so the body is parsed whatever the HTTP status
        let response = self
            .http
            .get(format!(
                "{}/simulation_progress/{}",
                self.base_url, simulation_id
            ))
            .send()
            .await
            .context("progress request failed")?;
        response
            .json()
            .await
            .context("progress response was not valid JSON")
    }

    async fn fetch_results(&self, simulation_id: &SimulationId) -> Result<Vec<AgentOutcome>> {
        let response = self
            .http
            .get(format!(
                "{}/simulation_results/{}",
                self.base_url, simulation_id
            ))
            .send()
            .await
            .context("results request failed")?;
        let status = response.status();
        let SimulationResultsResponse { agents, message } = response
            .json()
            .await
            .context("results response was not valid JSON")?;

        if !status.is_success() {
            return Err(anyhow!(message
                .unwrap_or_else(|| format!("results request returned status {status}"))));
        }
        match agents {
            Some(agents) => Ok(agents),
            None => Err(anyhow!(message
                .unwrap_or_else(|| "results response did not include an agents array".to_string()))),
        }
    }
}
