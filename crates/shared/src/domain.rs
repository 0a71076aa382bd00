use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque job identifier assigned by the remote simulation service on
/// acceptance. At most one identifier is live per controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulationId(pub String);

impl fmt::Display for SimulationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SimulationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Immutable input to one simulation job, built by the composing layer at
/// submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub scenario: String,
    pub context: String,
    pub action_space: String,
    pub demographic_group: String,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProgressSnapshot {
    pub completed: u64,
    pub total: u64,
}

impl ProgressSnapshot {
    /// Completion percentage clamped to [0, 100]; a zero or inconsistent
    /// total never produces a division artifact.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        ((self.completed as f64 / self.total as f64) * 100.0).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Persona {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AgentDecision {
    #[serde(default)]
    pub decision: String,
    #[serde(default)]
    pub rationale: String,
}

/// One simulated persona's outcome. Fields deserialize leniently so a single
/// malformed agent cannot invalidate a whole results payload; consumers skip
/// entries without an attribute or decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AgentOutcome {
    #[serde(default)]
    pub persona: Persona,
    #[serde(default)]
    pub attribute: String,
    #[serde(default)]
    pub result: AgentDecision,
}
