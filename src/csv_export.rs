use crate::error::Result;
use crate::society::Statistics;
use csv::Writer;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Buffered CSV writer for per-step society statistics
pub struct BufferedCsvExporter {
    path: PathBuf,
    buffer: Vec<StatsRecord>,
    buffer_size: usize,
    /// Set once the first flush has truncated the file and written the header
    header_written: bool,
}

#[derive(Debug, Clone)]
struct StatsRecord {
    step: usize,
    stats: Statistics,
}

const HEADER: [&str; 12] = [
    "step",
    "total_agents",
    "cooperation_rate",
    "established_rate",
    "avg_social_value",
    "avg_exploration_rate",
    "cooperating_agents",
    "defecting_agents",
    "cooperation_established",
    "unpaired_agents",
    "pairing_us",
    "settlement_us",
];

impl BufferedCsvExporter {
    pub fn new(path: &Path, buffer_size: usize) -> Self {
        Self {
            path: path.to_owned(),
            buffer: Vec::with_capacity(buffer_size),
            buffer_size: buffer_size.max(1),
            header_written: false,
        }
    }

    pub fn add_stats(&mut self, step: usize, stats: Statistics) -> Result<()> {
        self.buffer.push(StatsRecord { step, stats });

        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        // a fresh exporter replaces whatever an earlier run left at `path`
        let file = if self.header_written {
            OpenOptions::new().append(true).open(&self.path)?
        } else {
            File::create(&self.path)?
        };

        let mut writer = Writer::from_writer(file);

        if !self.header_written {
            writer.write_record(HEADER)?;
            self.header_written = true;
        }

        for record in &self.buffer {
            let stats = &record.stats;
            let pass = &stats.pass_stats;
            // sequential play has no synchronous passes to report
            let [unpaired, pairing, settlement] = if pass.rounds > 0 {
                [
                    pass.num_unpaired.to_string(),
                    pass.pairing_time.to_string(),
                    pass.settlement_time.to_string(),
                ]
            } else {
                Default::default()
            };
            writer.write_record(&[
                record.step.to_string(),
                stats.total_agents.to_string(),
                stats.cooperation_rate().to_string(),
                stats.established_rate().to_string(),
                stats.avg_social_value().to_string(),
                stats.avg_exploration_rate().to_string(),
                stats.cooperating_agents.to_string(),
                stats.defecting_agents.to_string(),
                stats.cooperation_established.to_string(),
                unpaired,
                pairing,
                settlement,
            ])?;
        }

        writer.flush()?;
        self.buffer.clear();

        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::society::PassStatistics;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("svo_{}_{}.csv", name, std::process::id()))
    }

    #[test]
    fn test_header_written_once_and_rows_buffered() {
        let path = scratch_path("buffered");
        let _ = std::fs::remove_file(&path);

        let mut exporter = BufferedCsvExporter::new(&path, 2);
        let stats = Statistics {
            total_agents: 4,
            cooperating_agents: 3,
            defecting_agents: 1,
            cooperation_established: 2,
            total_social_value: 2.0,
            ..Statistics::default()
        };

        exporter.add_stats(1, stats.clone()).unwrap();
        assert!(!path.exists());
        exporter.add_stats(2, stats.clone()).unwrap();
        exporter.add_stats(3, stats).unwrap();
        exporter.finish().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("step,total_agents,cooperation_rate"));
        assert!(lines[1].starts_with("1,4,0.75,0.5,0.5,"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("step")).count(), 1);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_new_run_replaces_stale_file() {
        let path = scratch_path("stale");
        std::fs::write(&path, "step,old_column\n99,stale\n").unwrap();

        let mut exporter = BufferedCsvExporter::new(&path, 1);
        exporter.add_stats(1, Statistics::default()).unwrap();
        exporter.add_stats(2, Statistics::default()).unwrap();
        exporter.finish().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("stale"));
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER.join(","));
        assert!(lines[1].starts_with("1,"));
        assert!(lines[2].starts_with("2,"));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_pass_columns_empty_without_synchronous_rounds() {
        let path = scratch_path("pass_columns");
        let _ = std::fs::remove_file(&path);

        let sequential = Statistics {
            total_agents: 4,
            ..Statistics::default()
        };
        let synchronous = Statistics {
            total_agents: 4,
            pass_stats: PassStatistics {
                rounds: 3,
                num_pairs: 5,
                num_unpaired: 2,
                pairing_time: 40,
                settlement_time: 70,
            },
            ..Statistics::default()
        };

        let mut exporter = BufferedCsvExporter::new(&path, 10);
        exporter.add_stats(1, sequential).unwrap();
        exporter.add_stats(2, synchronous).unwrap();
        exporter.finish().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert!(lines[1].ends_with(",,,"));
        assert!(lines[2].ends_with(",2,40,70"));

        std::fs::remove_file(&path).unwrap();
    }
}
