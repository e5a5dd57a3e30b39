use nalgebra::Point2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Index of an agent inside the society arena
pub type AgentId = usize;

/// Actions that agents can take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Action {
    Cooperate = 0,
    Defect = 1,
}

impl Action {
    /// Fixed iteration order; greedy ties resolve to the earlier entry.
    pub const ALL: [Action; 2] = [Action::Cooperate, Action::Defect];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// What an agent's neighbours are currently showing.
///
/// Neighbours that have never acted count towards `total` only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Neighbourhood {
    pub cooperating: usize,
    pub defecting: usize,
    pub total: usize,
}

impl Neighbourhood {
    pub fn observe(actions: impl IntoIterator<Item = Option<Action>>) -> Self {
        let mut view = Self::default();
        for action in actions {
            view.total += 1;
            match action {
                Some(Action::Cooperate) => view.cooperating += 1,
                Some(Action::Defect) => view.defecting += 1,
                None => {}
            }
        }
        view
    }
}

/// Per-agent learning parameters copied into every agent at setup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentParams {
    pub exploration_rate: f64,
    /// Multiplicative decay applied after every decision, `None` keeps the rate fixed
    pub exploration_decay: Option<f64>,
    pub social_adjustment: f64,
    pub social_step_size: f64,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            exploration_rate: 0.9,
            exploration_decay: None,
            social_adjustment: 1.0,
            social_step_size: 0.1,
        }
    }
}

/// An epsilon-greedy learner playing a two-action social dilemma
#[derive(Debug, Clone)]
pub struct LearningAgent {
    pub id: AgentId,
    /// Learned desirability of each action, indexed by `Action::index`
    pub action_values: [f64; 2],
    pub exploration_rate: f64,
    pub position: Point2<f64>,
    exploration_decay: Option<f64>,
    social_value: f64,
    social_adjustment: f64,
    social_step_size: f64,
    current_action: Option<Action>,
    pub(crate) neighbours: Vec<AgentId>,
    pub(crate) current_opponent: Option<AgentId>,
    pub(crate) has_acted: bool,
}

impl LearningAgent {
    pub fn new(id: AgentId, params: &AgentParams, social_value: f64) -> Self {
        Self {
            id,
            action_values: [0.0; 2],
            exploration_rate: params.exploration_rate,
            position: Point2::origin(),
            exploration_decay: params.exploration_decay,
            social_value: social_value.clamp(0.0, 1.0),
            social_adjustment: params.social_adjustment,
            social_step_size: params.social_step_size,
            current_action: None,
            neighbours: Vec::new(),
            current_opponent: None,
            has_acted: false,
        }
    }

    #[inline]
    pub fn action_value(&self, action: Action) -> f64 {
        self.action_values[action.index()]
    }

    pub fn current_action(&self) -> Option<Action> {
        self.current_action
    }

    pub fn social_value(&self) -> f64 {
        self.social_value
    }

    pub fn neighbours(&self) -> &[AgentId] {
        &self.neighbours
    }

    pub fn current_opponent(&self) -> Option<AgentId> {
        self.current_opponent
    }

    pub fn has_acted(&self) -> bool {
        self.has_acted
    }

    /// Whether the learned value of cooperating beats defecting
    pub fn cooperation_established(&self) -> bool {
        self.action_value(Action::Cooperate) > self.action_value(Action::Defect)
    }

    /// Action with the strictly greatest value, first in `Action::ALL` on ties
    pub fn greedy_action(&self) -> Action {
        let mut best = Action::ALL[0];
        for &action in &Action::ALL[1..] {
            if self.action_value(action) > self.action_value(best) {
                best = action;
            }
        }
        best
    }

    /// Get action using epsilon-greedy strategy
    pub fn select_action<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Action {
        let roll: f64 = rng.gen();
        let action = if roll < self.exploration_rate {
            Action::ALL[rng.gen_range(0..Action::ALL.len())]
        } else {
            self.greedy_action()
        };

        self.current_action = Some(action);
        self.has_acted = true;
        if let Some(decay) = self.exploration_decay {
            self.exploration_rate *= decay;
        }
        action
    }

    /// Blend the game reward with the perceived group value of the last action and
    /// smooth it into that action's estimate. Returns the blended reward.
    pub fn assimilate_reward(
        &mut self,
        reward: f64,
        learning_rate: f64,
        neighbourhood: Neighbourhood,
    ) -> Result<f64> {
        let action = self
            .current_action
            .ok_or(SimError::NoActionYet { agent: self.id })?;
        if neighbourhood.total == 0 {
            return Err(SimError::IsolatedAgent { agent: self.id });
        }

        let mut perceived = neighbourhood.cooperating as f64 / neighbourhood.total as f64;
        if action == Action::Defect {
            perceived = -perceived;
        }
        let total_reward = self.social_value * perceived + (1.0 - self.social_value) * reward;

        let slot = &mut self.action_values[action.index()];
        *slot = learning_rate * total_reward + (1.0 - learning_rate) * *slot;
        Ok(total_reward)
    }

    /// Move the social value towards the neighbourhood's net cooperation, clamped to [0, 1]
    pub fn update_social_value(&mut self, neighbourhood: Neighbourhood) -> Result<f64> {
        if neighbourhood.total == 0 {
            return Err(SimError::IsolatedAgent { agent: self.id });
        }

        // in [-1, 1]
        let cooperation_rate = (neighbourhood.cooperating as f64
            - neighbourhood.defecting as f64)
            / neighbourhood.total as f64;

        let previous = (1.0 - self.social_adjustment) * self.social_value;
        let stepped = self.social_adjustment
            * (self.social_value + self.social_step_size * cooperation_rate);
        self.social_value = (previous + stepped).clamp(0.0, 1.0);
        Ok(self.social_value)
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            cooperate_value: self.action_value(Action::Cooperate),
            defect_value: self.action_value(Action::Defect),
            social_value: self.social_value,
            exploration_rate: self.exploration_rate,
            current_action: self.current_action,
            position: [self.position.x, self.position.y],
            neighbours: self.neighbours.clone(),
        }
    }
}

/// Serializable view of one agent for downstream aggregation or rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub cooperate_value: f64,
    pub defect_value: f64,
    pub social_value: f64,
    pub exploration_rate: f64,
    pub current_action: Option<Action>,
    pub position: [f64; 2],
    pub neighbours: Vec<AgentId>,
}
