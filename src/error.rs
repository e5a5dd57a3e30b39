use thiserror::Error;

use crate::agent::AgentId;

/// Errors raised while configuring or running a society
#[derive(Error, Debug)]
pub enum SimError {
    /// Configuration rejected before any agent was built
    #[error("Configuration error: {0}")]
    Config(String),

    /// An agent ended up without neighbours, so neighbourhood ratios are undefined
    #[error("Agent {agent} has no neighbours")]
    IsolatedAgent { agent: AgentId },

    /// Reward was assimilated before the agent ever selected an action
    #[error("Agent {agent} has not selected an action yet")]
    NoActionYet { agent: AgentId },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl SimError {
    pub fn config(message: impl Into<String>) -> Self {
        SimError::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
