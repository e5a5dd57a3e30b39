//! JSON dump of per-agent state for downstream aggregation and plotting.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::AgentSnapshot;
use crate::error::Result;
use crate::society::Society;
use crate::topology::TopologyKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocietySnapshot {
    pub topology: TopologyKind,
    pub learning_rate: f64,
    pub agents: Vec<AgentSnapshot>,
}

impl SocietySnapshot {
    pub fn capture(society: &Society) -> Self {
        Self {
            topology: society.topology(),
            learning_rate: society.learning_rate,
            agents: society.snapshot(),
        }
    }
}

pub fn write_snapshot(path: &Path, society: &Society) -> Result<()> {
    let snapshot = SocietySnapshot::capture(society);
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, &snapshot)?;
    info!("Wrote {} agent states to {}", snapshot.agents.len(), path.display());
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<SocietySnapshot> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::SimRng;
    use rand::SeedableRng;

    #[test]
    fn test_snapshot_file_matches_society() {
        let mut rng = SimRng::seed_from_u64(21);
        let config = SimulationConfig {
            agents: 12,
            topology: TopologyKind::ScaleFree { links: 2 },
            ..SimulationConfig::default()
        };
        let mut society = Society::new(&config, &mut rng).unwrap();
        society.play_all(4, &mut rng).unwrap();

        let path = std::env::temp_dir().join(format!("svo_snapshot_{}.json", std::process::id()));
        write_snapshot(&path, &society).unwrap();
        let loaded = read_snapshot(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.topology, TopologyKind::ScaleFree { links: 2 });
        assert_eq!(loaded.agents.len(), 12);
        for (agent, saved) in society.agents().iter().zip(&loaded.agents) {
            assert_eq!(saved.neighbours, agent.neighbours());
            assert_eq!(saved.current_action, agent.current_action());
        }
    }
}
