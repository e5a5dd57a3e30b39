//! Reinforcement-learning agents playing a cooperate/defect dilemma against their
//! network neighbours, with an adaptive social value orientation.
//!
//! A [`society::Society`] is built from a [`config::SimulationConfig`], wired by one
//! of the [`topology`] builders, and driven with `play_one` (sequential games) or
//! `play_all` (synchronous rounds). All randomness comes from a caller-supplied
//! generator, so a seed fully determines a run.

pub mod agent;
pub mod config;
pub mod csv_export;
pub mod error;
pub mod snapshot;
pub mod society;
pub mod topology;

pub use agent::{Action, AgentId, LearningAgent};
pub use config::SimulationConfig;
pub use error::SimError;
pub use society::{PayoffTable, Society, Statistics};
pub use topology::{Canvas, TopologyKind};

/// Seedable generator shared by every randomised operation
pub type SimRng = rand_xoshiro::Xoshiro256PlusPlus;
