use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::Distribution;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use crate::agent::{Action, AgentId, AgentSnapshot, LearningAgent, Neighbourhood};
use crate::config::SimulationConfig;
use crate::error::{Result, SimError};
use crate::topology::{self, TopologyKind};

/// Payoff table for the two-action dilemma, read from the row player's side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoffTable {
    /// Both cooperate
    pub reward: f64,
    /// Defect against a cooperator
    pub temptation: f64,
    /// Both defect
    pub punishment: f64,
    /// Cooperate against a defector
    pub sucker: f64,
}

impl Default for PayoffTable {
    fn default() -> Self {
        Self {
            reward: 3.0,
            temptation: 5.0,
            punishment: 1.0,
            sucker: -1.0,
        }
    }
}

impl PayoffTable {
    pub fn get(&self, my_action: Action, opp_action: Action) -> f64 {
        match (my_action, opp_action) {
            (Action::Cooperate, Action::Cooperate) => self.reward,
            (Action::Defect, Action::Defect) => self.punishment,
            (Action::Defect, Action::Cooperate) => self.temptation,
            (Action::Cooperate, Action::Defect) => self.sucker,
        }
    }

    pub fn is_finite(&self) -> bool {
        [self.reward, self.temptation, self.punishment, self.sucker]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Result of one sequential game
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameOutcome {
    pub first: AgentId,
    pub second: AgentId,
    pub first_action: Action,
    pub second_action: Action,
    pub first_payoff: f64,
    pub second_payoff: f64,
}

/// The agent arena plus the scheduling protocols that drive it
pub struct Society {
    agents: Vec<LearningAgent>,
    topology: TopologyKind,
    pub learning_rate: f64,
    pub update_social_values: bool,
    pub payoff_table: PayoffTable,

    // Pass statistics of the last `play_all` call
    pub pass_stats: PassStatistics,
}

impl Society {
    /// Build the agents and wire them. Every randomised step draws from `rng`.
    pub fn new<R: Rng + ?Sized>(config: &SimulationConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let params = config.agent_params();
        let jitter = config.social.jitter()?;
        let mut agents = Vec::with_capacity(config.agents);
        for id in 0..config.agents {
            let mut social_value = config.social.initial_value;
            if let Some(normal) = &jitter {
                social_value += normal.sample(rng);
            }
            agents.push(LearningAgent::new(id, &params, social_value));
        }

        let graph = topology::build(config.topology, config.agents, config.canvas, rng)?;
        let total_degree = graph.total_degree();
        let (adjacency, positions) = graph.into_parts();
        for ((agent, neighbours), position) in agents.iter_mut().zip(adjacency).zip(positions) {
            agent.neighbours = neighbours;
            agent.position = position;
        }

        if let Some(isolated) = agents.iter().find(|a| a.neighbours.is_empty()) {
            return Err(SimError::IsolatedAgent { agent: isolated.id });
        }

        info!(
            "Society ready: {} agents, {} topology, mean degree {:.2}",
            agents.len(),
            config.topology.name(),
            total_degree as f64 / agents.len() as f64
        );

        Ok(Self {
            agents,
            topology: config.topology,
            learning_rate: config.learning_rate,
            update_social_values: config.social.update_enabled,
            payoff_table: config.payoffs,
            pass_stats: PassStatistics::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn topology(&self) -> TopologyKind {
        self.topology
    }

    pub fn agents(&self) -> &[LearningAgent] {
        &self.agents
    }

    pub fn agent(&self, id: AgentId) -> &LearningAgent {
        &self.agents[id]
    }

    /// Mutable access to one agent's learned state; the neighbour wiring stays fixed.
    pub fn agent_mut(&mut self, id: AgentId) -> &mut LearningAgent {
        &mut self.agents[id]
    }

    pub fn q_values(&self) -> Vec<[f64; 2]> {
        self.agents.iter().map(|a| a.action_values).collect()
    }

    pub fn social_values(&self) -> Vec<f64> {
        self.agents.iter().map(LearningAgent::social_value).collect()
    }

    pub fn snapshot(&self) -> Vec<AgentSnapshot> {
        self.agents.iter().map(LearningAgent::snapshot).collect()
    }

    /// What `id`'s neighbours are showing right now
    pub fn neighbourhood(&self, id: AgentId) -> Neighbourhood {
        Neighbourhood::observe(
            self.agents[id]
                .neighbours
                .iter()
                .map(|&n| self.agents[n].current_action()),
        )
    }

    /// Play one isolated game between a random agent and one of its neighbours
    pub fn play_one<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<GameOutcome> {
        let first = rng.gen_range(0..self.agents.len());
        let second = *self.agents[first]
            .neighbours
            .choose(rng)
            .ok_or(SimError::IsolatedAgent { agent: first })?;

        let first_action = self.agents[first].select_action(rng);
        let second_action = self.agents[second].select_action(rng);

        let first_payoff = self.settle(first, second)?;
        let second_payoff = self.settle(second, first)?;
        self.adapt_social_value(first)?;
        self.adapt_social_value(second)?;

        // sequential games leave no round bookkeeping behind
        self.agents[first].has_acted = false;
        self.agents[second].has_acted = false;

        Ok(GameOutcome {
            first,
            second,
            first_action,
            second_action,
            first_payoff,
            second_payoff,
        })
    }

    /// Run `rounds` synchronous rounds. All pairings of a round are fixed before any
    /// agent is paid, so rewards only ever see this round's actions.
    pub fn play_all<R: Rng + ?Sized>(&mut self, rounds: usize, rng: &mut R) -> Result<()> {
        if rounds == 0 {
            return Ok(());
        }
        self.pass_stats.reset();

        for _ in 0..rounds {
            // === Pass 1: Pairing ===
            let start = Instant::now();
            let pairs = self.pair_agents(rng);
            self.pass_stats.pairing_time += start.elapsed().as_micros();
            self.pass_stats.num_pairs += pairs;

            // === Pass 2: Settlement ===
            let start = Instant::now();
            let unpaired = self.settle_round()?;
            self.pass_stats.settlement_time += start.elapsed().as_micros();
            self.pass_stats.num_unpaired += unpaired;
            self.pass_stats.rounds += 1;
        }

        debug!(
            rounds,
            pairs = self.pass_stats.num_pairs,
            unpaired = self.pass_stats.num_unpaired,
            pairing_us = self.pass_stats.pairing_time,
            settlement_us = self.pass_stats.settlement_time,
            "Synchronous play finished"
        );
        Ok(())
    }

    fn pair_agents<R: Rng + ?Sized>(&mut self, rng: &mut R) -> usize {
        for agent in &mut self.agents {
            agent.current_opponent = None;
        }

        let mut pairs = 0;
        let mut candidates = Vec::new();
        for id in 0..self.agents.len() {
            if self.agents[id].has_acted {
                continue;
            }

            candidates.clear();
            candidates.extend(
                self.agents[id]
                    .neighbours
                    .iter()
                    .copied()
                    .filter(|&n| !self.agents[n].has_acted),
            );
            let Some(&opponent) = candidates.choose(rng) else {
                continue;
            };

            self.agents[id].current_opponent = Some(opponent);
            self.agents[opponent].current_opponent = Some(id);
            self.agents[id].select_action(rng);
            self.agents[opponent].select_action(rng);
            pairs += 1;
        }
        pairs
    }

    /// Pay every paired agent and clear its round flag. Returns the unpaired count.
    fn settle_round(&mut self) -> Result<usize> {
        let mut unpaired = 0;
        for id in 0..self.agents.len() {
            let opponent = match self.agents[id].current_opponent {
                Some(opponent) if self.agents[id].has_acted => opponent,
                _ => {
                    unpaired += 1;
                    continue;
                }
            };

            self.settle(id, opponent)?;
            self.adapt_social_value(id)?;
            self.agents[id].has_acted = false;
        }
        Ok(unpaired)
    }

    /// Pay `id` for its game against `opponent` and return the raw payoff
    fn settle(&mut self, id: AgentId, opponent: AgentId) -> Result<f64> {
        let own = self.agents[id]
            .current_action()
            .ok_or(SimError::NoActionYet { agent: id })?;
        let other = self.agents[opponent]
            .current_action()
            .ok_or(SimError::NoActionYet { agent: opponent })?;

        let payoff = self.payoff_table.get(own, other);
        let view = self.neighbourhood(id);
        self.agents[id].assimilate_reward(payoff, self.learning_rate, view)?;
        Ok(payoff)
    }

    fn adapt_social_value(&mut self, id: AgentId) -> Result<()> {
        if self.update_social_values {
            let view = self.neighbourhood(id);
            self.agents[id].update_social_value(view)?;
        }
        Ok(())
    }

    /// Get statistics for the current state
    pub fn get_statistics(&self) -> Statistics {
        let partial_stats: Vec<Statistics> = self
            .agents
            .par_chunks(10_000)
            .map(|chunk| {
                let mut local_stats = Statistics::default();
                for agent in chunk {
                    local_stats.total_agents += 1;
                    local_stats.total_social_value += agent.social_value();
                    local_stats.total_exploration_rate += agent.exploration_rate;
                    match agent.current_action() {
                        Some(Action::Cooperate) => local_stats.cooperating_agents += 1,
                        Some(Action::Defect) => local_stats.defecting_agents += 1,
                        None => {}
                    }
                    if agent.cooperation_established() {
                        local_stats.cooperation_established += 1;
                    }
                }
                local_stats
            })
            .collect();

        let mut stats = Statistics::default();
        for partial in partial_stats {
            stats.total_agents += partial.total_agents;
            stats.cooperating_agents += partial.cooperating_agents;
            stats.defecting_agents += partial.defecting_agents;
            stats.cooperation_established += partial.cooperation_established;
            stats.total_social_value += partial.total_social_value;
            stats.total_exploration_rate += partial.total_exploration_rate;
        }
        stats.pass_stats = self.pass_stats.clone();
        stats
    }
}

/// Bookkeeping of the last `play_all` call. Sequential play never fills it,
/// so `rounds == 0` means there is nothing to report.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PassStatistics {
    pub rounds: usize,
    pub num_pairs: usize,
    pub num_unpaired: usize,
    /// Microseconds spent in the pairing pass
    pub pairing_time: u128,
    /// Microseconds spent in the settlement pass
    pub settlement_time: u128,
}

impl PassStatistics {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Statistics {
    pub total_agents: usize,
    pub cooperating_agents: usize,
    pub defecting_agents: usize,
    /// Agents whose learned Cooperate value beats Defect
    pub cooperation_established: usize,
    pub total_social_value: f64,
    pub total_exploration_rate: f64,
    pub pass_stats: PassStatistics,
}

impl Statistics {
    pub fn cooperation_rate(&self) -> f64 {
        let acted = self.cooperating_agents + self.defecting_agents;
        if acted > 0 {
            self.cooperating_agents as f64 / acted as f64
        } else {
            0.0
        }
    }

    pub fn established_rate(&self) -> f64 {
        if self.total_agents > 0 {
            self.cooperation_established as f64 / self.total_agents as f64
        } else {
            0.0
        }
    }

    pub fn avg_social_value(&self) -> f64 {
        if self.total_agents > 0 {
            self.total_social_value / self.total_agents as f64
        } else {
            0.0
        }
    }

    pub fn avg_exploration_rate(&self) -> f64 {
        if self.total_agents > 0 {
            self.total_exploration_rate / self.total_agents as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExplorationConfig, SocialConfig};
    use crate::SimRng;
    use rand::SeedableRng;

    fn small_config(topology: TopologyKind, agents: usize) -> SimulationConfig {
        SimulationConfig {
            agents,
            topology,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_payoff_table() {
        let table = PayoffTable::default();
        assert_eq!(table.get(Action::Cooperate, Action::Cooperate), 3.0);
        assert_eq!(table.get(Action::Defect, Action::Defect), 1.0);
        assert_eq!(table.get(Action::Defect, Action::Cooperate), 5.0);
        assert_eq!(table.get(Action::Cooperate, Action::Defect), -1.0);
    }

    #[test]
    fn test_new_rejects_empty_population() {
        let mut rng = SimRng::seed_from_u64(0);
        let config = small_config(TopologyKind::Random { neighbours: 2 }, 0);
        assert!(matches!(Society::new(&config, &mut rng), Err(SimError::Config(_))));
    }

    #[test]
    fn test_new_wires_every_agent() {
        let mut rng = SimRng::seed_from_u64(1);
        let config = small_config(TopologyKind::Grid { side: 5 }, 25);
        let society = Society::new(&config, &mut rng).unwrap();
        assert_eq!(society.len(), 25);
        assert!(society.agents().iter().all(|a| !a.neighbours().is_empty()));
        assert!(society.agents().iter().all(|a| a.current_action().is_none()));
    }

    #[test]
    fn test_jitter_keeps_social_values_in_range() {
        let mut rng = SimRng::seed_from_u64(2);
        let config = SimulationConfig {
            agents: 200,
            social: SocialConfig {
                initial_value: 0.95,
                jitter_std_dev: Some(0.3),
                ..SocialConfig::default()
            },
            ..SimulationConfig::default()
        };
        let society = Society::new(&config, &mut rng).unwrap();
        let values = society.social_values();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(values.iter().any(|&v| v != 0.95));
    }

    #[test]
    fn test_play_one_pays_both_sides() {
        let mut rng = SimRng::seed_from_u64(3);
        let config = small_config(TopologyKind::Random { neighbours: 3 }, 10);
        let mut society = Society::new(&config, &mut rng).unwrap();

        let outcome = society.play_one(&mut rng).unwrap();
        assert!(society.agent(outcome.first).neighbours().contains(&outcome.second));
        assert_eq!(
            outcome.first_payoff,
            society.payoff_table.get(outcome.first_action, outcome.second_action)
        );
        assert_eq!(
            outcome.second_payoff,
            society.payoff_table.get(outcome.second_action, outcome.first_action)
        );
        assert!(society.agents().iter().all(|a| !a.has_acted()));
    }

    #[test]
    fn test_synchronous_pairs_are_mutual() {
        let mut rng = SimRng::seed_from_u64(4);
        // odd population on a grid always leaves somebody out
        let config = small_config(TopologyKind::Grid { side: 3 }, 9);
        let mut society = Society::new(&config, &mut rng).unwrap();

        for _ in 0..20 {
            let before: Vec<LearningAgent> = society.agents().to_vec();
            society.play_all(1, &mut rng).unwrap();

            let mut unpaired = 0;
            for agent in society.agents() {
                assert!(!agent.has_acted());
                match agent.current_opponent() {
                    Some(opponent) => {
                        assert_eq!(society.agent(opponent).current_opponent(), Some(agent.id));
                        assert!(agent.neighbours().contains(&opponent));
                    }
                    None => {
                        unpaired += 1;
                        let old = &before[agent.id];
                        assert_eq!(agent.action_values, old.action_values);
                        assert_eq!(agent.current_action(), old.current_action());
                        assert_eq!(agent.exploration_rate, old.exploration_rate);
                    }
                }
            }
            assert!(unpaired >= 1);
            assert_eq!(society.pass_stats.num_unpaired, unpaired);
            assert_eq!(society.pass_stats.num_pairs * 2 + unpaired, 9);
        }
    }

    #[test]
    fn test_synchronous_round_pays_from_this_rounds_actions() {
        let mut rng = SimRng::seed_from_u64(8);
        let config = SimulationConfig {
            agents: 4,
            learning_rate: 0.5,
            topology: TopologyKind::Grid { side: 2 },
            exploration: ExplorationConfig {
                rate: 0.0,
                ..ExplorationConfig::default()
            },
            social: SocialConfig {
                initial_value: 0.2,
                ..SocialConfig::default()
            },
            ..SimulationConfig::default()
        };
        let mut society = Society::new(&config, &mut rng).unwrap();
        // 0 and 3 sit diagonally, so every grid link joins a cooperator to a defector
        for id in [0, 3] {
            society.agent_mut(id).action_values = [1.0, 0.0];
        }
        for id in [1, 2] {
            society.agent_mut(id).action_values = [0.0, 1.0];
        }

        society.play_all(1, &mut rng).unwrap();
        assert_eq!(society.pass_stats.num_pairs, 2);
        assert_eq!(society.pass_stats.num_unpaired, 0);

        // cooperator: 0.5 * (0.8 * -1 + 0.2 * 0) + 0.5 * 1
        for id in [0, 3] {
            let agent = society.agent(id);
            assert_eq!(agent.current_action(), Some(Action::Cooperate));
            assert!((agent.action_value(Action::Cooperate) - 0.1).abs() < 1e-12);
            assert_eq!(agent.action_value(Action::Defect), 0.0);
        }
        // defector sees both neighbours cooperate: 0.5 * (0.8 * 5 + 0.2 * -1) + 0.5 * 1
        for id in [1, 2] {
            let agent = society.agent(id);
            assert_eq!(agent.current_action(), Some(Action::Defect));
            assert!((agent.action_value(Action::Defect) - 2.4).abs() < 1e-12);
            assert_eq!(agent.action_value(Action::Cooperate), 0.0);
        }
    }

    #[test]
    fn test_play_all_zero_rounds_changes_nothing() {
        let mut rng = SimRng::seed_from_u64(5);
        let config = small_config(TopologyKind::Random { neighbours: 4 }, 20);
        let mut society = Society::new(&config, &mut rng).unwrap();
        society.play_all(3, &mut rng).unwrap();

        let before = society.snapshot();
        let opponents: Vec<_> = society.agents().iter().map(|a| a.current_opponent()).collect();
        let flags: Vec<_> = society.agents().iter().map(|a| a.has_acted()).collect();

        society.play_all(0, &mut rng).unwrap();

        assert_eq!(society.snapshot(), before);
        let opponents_after: Vec<_> = society.agents().iter().map(|a| a.current_opponent()).collect();
        let flags_after: Vec<_> = society.agents().iter().map(|a| a.has_acted()).collect();
        assert_eq!(opponents, opponents_after);
        assert_eq!(flags, flags_after);
    }

    #[test]
    fn test_social_values_stay_clamped_under_play() {
        let mut rng = SimRng::seed_from_u64(6);
        let config = SimulationConfig {
            agents: 64,
            topology: TopologyKind::NearestK { neighbours: 4 },
            social: SocialConfig {
                initial_value: 0.5,
                update_enabled: true,
                adjustment: 0.5,
                step_size: 0.4,
                ..SocialConfig::default()
            },
            ..SimulationConfig::default()
        };
        let mut society = Society::new(&config, &mut rng).unwrap();

        for _ in 0..50 {
            society.play_all(2, &mut rng).unwrap();
            society.play_one(&mut rng).unwrap();
            assert!(society.social_values().iter().all(|v| (0.0..=1.0).contains(v)));
            assert!(society
                .q_values()
                .iter()
                .all(|q| q.iter().all(|v| v.is_finite())));
        }
    }

    #[test]
    fn test_statistics_counts() {
        let mut rng = SimRng::seed_from_u64(7);
        let config = small_config(TopologyKind::Random { neighbours: 5 }, 30);
        let mut society = Society::new(&config, &mut rng).unwrap();

        let fresh = society.get_statistics();
        assert_eq!(fresh.total_agents, 30);
        assert_eq!(fresh.cooperating_agents + fresh.defecting_agents, 0);
        assert!((fresh.avg_social_value() - 0.7).abs() < 1e-12);

        society.play_all(5, &mut rng).unwrap();
        let stats = society.get_statistics();
        assert!(stats.cooperating_agents + stats.defecting_agents <= 30);
        assert!((0.0..=1.0).contains(&stats.cooperation_rate()));
        assert!((0.0..=1.0).contains(&stats.established_rate()));
        assert_eq!(stats.pass_stats.rounds, 5);
    }
}
