//! Simulation configuration.
//!
//! Defaults mirror the reference experiment: 500 agents, 20 random neighbours,
//! learning rate 0.1 and a 1500x1500 layout canvas.

use std::fs;
use std::path::Path;

use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::agent::AgentParams;
use crate::error::{Result, SimError};
use crate::society::PayoffTable;
use crate::topology::{Canvas, TopologyKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub agents: usize,
    pub learning_rate: f64,
    pub topology: TopologyKind,
    pub exploration: ExplorationConfig,
    pub social: SocialConfig,
    pub canvas: Canvas,
    pub payoffs: PayoffTable,
}

/// Epsilon-greedy exploration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    pub rate: f64,
    pub decay: f64,
    pub decay_enabled: bool,
}

/// Social value orientation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialConfig {
    pub initial_value: f64,
    /// Standard deviation of Gaussian jitter added to every agent's initial value
    pub jitter_std_dev: Option<f64>,
    pub update_enabled: bool,
    pub adjustment: f64,
    pub step_size: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            agents: 500,
            learning_rate: 0.1,
            topology: TopologyKind::default(),
            exploration: ExplorationConfig::default(),
            social: SocialConfig::default(),
            canvas: Canvas::default(),
            payoffs: PayoffTable::default(),
        }
    }
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            rate: 0.9,
            decay: 0.9999,
            decay_enabled: false,
        }
    }
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            initial_value: 0.7,
            jitter_std_dev: None,
            update_enabled: false,
            adjustment: 1.0,
            step_size: 0.1,
        }
    }
}

impl SocialConfig {
    /// Jitter distribution for initial social values, if enabled
    pub fn jitter(&self) -> Result<Option<Normal<f64>>> {
        self.jitter_std_dev
            .map(|std_dev| {
                Normal::new(0.0, std_dev)
                    .map_err(|e| SimError::config(format!("social jitter: {e}")))
            })
            .transpose()
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(SimError::config(format!("{name} must lie in [0, 1], got {value}")));
    }
    Ok(())
}

impl SimulationConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn agent_params(&self) -> AgentParams {
        AgentParams {
            exploration_rate: self.exploration.rate,
            exploration_decay: self
                .exploration
                .decay_enabled
                .then_some(self.exploration.decay),
            social_adjustment: self.social.adjustment,
            social_step_size: self.social.step_size,
        }
    }

    /// Reject anything that would make the society degenerate or produce NaN
    pub fn validate(&self) -> Result<()> {
        if self.agents < 2 {
            return Err(SimError::config(format!(
                "population needs at least two agents, got {}",
                self.agents
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(SimError::config(format!(
                "learning rate must lie in (0, 1], got {}",
                self.learning_rate
            )));
        }

        check_unit("exploration rate", self.exploration.rate)?;
        if !(self.exploration.decay > 0.0 && self.exploration.decay <= 1.0) {
            return Err(SimError::config(format!(
                "exploration decay must lie in (0, 1], got {}",
                self.exploration.decay
            )));
        }

        check_unit("initial social value", self.social.initial_value)?;
        check_unit("social adjustment", self.social.adjustment)?;
        if !(self.social.step_size.is_finite() && self.social.step_size >= 0.0) {
            return Err(SimError::config(format!(
                "social step size must be finite and non-negative, got {}",
                self.social.step_size
            )));
        }
        if let Some(std_dev) = self.social.jitter_std_dev {
            if !(std_dev.is_finite() && std_dev >= 0.0) {
                return Err(SimError::config(format!(
                    "social jitter std dev must be finite and non-negative, got {std_dev}"
                )));
            }
        }

        if !(self.canvas.width > 0.0 && self.canvas.height > 0.0)
            || !self.canvas.width.is_finite()
            || !self.canvas.height.is_finite()
        {
            return Err(SimError::config("canvas dimensions must be positive"));
        }
        if !self.payoffs.is_finite() {
            return Err(SimError::config("payoffs must be finite"));
        }

        match self.topology {
            TopologyKind::Random { neighbours } | TopologyKind::NearestK { neighbours } => {
                if neighbours == 0 {
                    return Err(SimError::config(format!(
                        "{} topology needs at least one neighbour per agent",
                        self.topology.name()
                    )));
                }
            }
            TopologyKind::Grid { side } => {
                if side < 2 || side.checked_mul(side) != Some(self.agents) {
                    return Err(SimError::config(format!(
                        "grid side {side} does not fit {} agents",
                        self.agents
                    )));
                }
            }
            TopologyKind::ScaleFree { links } => {
                if links == 0 || links >= self.agents {
                    return Err(SimError::config(format!(
                        "scale-free links must lie in [1, {}), got {links}",
                        self.agents
                    )));
                }
            }
        }
        Ok(())
    }
}
