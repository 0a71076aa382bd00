use serde::{Deserialize, Serialize};

use crate::domain::AgentOutcome;

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_COMPLETED: &str = "completed";

/// Body for `POST /generate_persona`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitSimulationRequest {
    pub scenario: String,
    pub context: String,
    pub action_space: String,
    pub demographic_group: String,
    pub attributes_list: Vec<String>,
}

/// Acceptance body for a submission. Only HTTP 202 carrying `simulationId`
/// counts as accepted; `message` is diagnostics on rejection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubmitSimulationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body for `GET /simulation_progress/{id}`. `status` stays a raw string so
/// an out-of-contract value can be surfaced literally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationProgressResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Body for `GET /simulation_results/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SimulationResultsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<AgentOutcome>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
