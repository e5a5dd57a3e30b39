use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use svo_simulator::config::{ExplorationConfig, SimulationConfig, SocialConfig};
use svo_simulator::csv_export::BufferedCsvExporter;
use svo_simulator::snapshot::write_snapshot;
use svo_simulator::{Canvas, PayoffTable, SimRng, Society, TopologyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TopologyArg {
    Random,
    Grid,
    NearestK,
    ScaleFree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PlayMode {
    /// One pairwise game per step
    Sequential,
    /// One population-wide round per step
    Synchronous,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; replaces every society flag below
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Number of agents (ignored for grid, which uses grid-side squared)
    #[arg(short = 'n', long, default_value_t = 500)]
    agents: usize,

    #[arg(long, value_enum, default_value_t = TopologyArg::Random)]
    topology: TopologyArg,

    /// Neighbours per agent for random and nearest-k topologies
    #[arg(short = 'k', long, default_value_t = 20)]
    neighbours: usize,

    #[arg(long, default_value_t = 20)]
    grid_side: usize,

    /// Links each newcomer makes in the scale-free topology
    #[arg(long, default_value_t = 1)]
    scale_free_links: usize,

    #[arg(long, default_value_t = 0.1)]
    learning_rate: f64,

    #[arg(long, default_value_t = 0.9)]
    exploration: f64,

    #[arg(long, default_value_t = 0.9999)]
    exploration_decay: f64,

    /// Decay the exploration rate after every decision
    #[arg(long)]
    decay_exploration: bool,

    /// Initial social value orientation
    #[arg(long, default_value_t = 0.7)]
    social_value: f64,

    /// Std dev of Gaussian jitter on the initial social value
    #[arg(long)]
    social_jitter: Option<f64>,

    /// Let social values adapt to the neighbourhood
    #[arg(long)]
    update_social: bool,

    #[arg(long, default_value_t = 1.0)]
    social_adjustment: f64,

    #[arg(long, default_value_t = 0.1)]
    social_step: f64,

    /// Layout canvas width
    #[arg(long, default_value_t = 1500.0)]
    width: f64,

    /// Layout canvas height
    #[arg(long, default_value_t = 1500.0)]
    height: f64,

    #[arg(short = 'm', long, value_enum, default_value_t = PlayMode::Sequential)]
    mode: PlayMode,

    /// Games (sequential) or rounds (synchronous) to play
    #[arg(short = 't', long, default_value_t = 50_000)]
    steps: usize,

    /// Steps between statistics rows
    #[arg(long, default_value_t = 1000)]
    report_every: usize,

    #[arg(short = 's', long, default_value_t = 42)]
    seed: u64,

    /// Output CSV file path
    #[arg(short = 'o', long, default_value = "statistics.csv")]
    output_csv: PathBuf,

    /// Write the final per-agent state as JSON
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Number of threads for statistics (0 = auto)
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

impl Args {
    fn to_config(&self) -> SimulationConfig {
        let (agents, topology) = match self.topology {
            TopologyArg::Random => (
                self.agents,
                TopologyKind::Random {
                    neighbours: self.neighbours,
                },
            ),
            TopologyArg::Grid => (
                self.grid_side * self.grid_side,
                TopologyKind::Grid {
                    side: self.grid_side,
                },
            ),
            TopologyArg::NearestK => (
                self.agents,
                TopologyKind::NearestK {
                    neighbours: self.neighbours,
                },
            ),
            TopologyArg::ScaleFree => (
                self.agents,
                TopologyKind::ScaleFree {
                    links: self.scale_free_links,
                },
            ),
        };

        SimulationConfig {
            agents,
            learning_rate: self.learning_rate,
            topology,
            exploration: ExplorationConfig {
                rate: self.exploration,
                decay: self.exploration_decay,
                decay_enabled: self.decay_exploration,
            },
            social: SocialConfig {
                initial_value: self.social_value,
                jitter_std_dev: self.social_jitter,
                update_enabled: self.update_social,
                adjustment: self.social_adjustment,
                step_size: self.social_step,
            },
            canvas: Canvas::new(self.width, self.height),
            payoffs: PayoffTable::default(),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()?;
    }

    let config = match &args.config {
        Some(path) => SimulationConfig::from_json_file(path)?,
        None => args.to_config(),
    };

    info!("SVO Simulator");
    info!(
        "Agents: {} | Topology: {} | Mode: {:?} | Steps: {} | Seed: {}",
        config.agents,
        config.topology.name(),
        args.mode,
        args.steps,
        args.seed
    );

    let mut rng = SimRng::seed_from_u64(args.seed);
    let mut society = Society::new(&config, &mut rng)?;

    let mut csv_exporter = BufferedCsvExporter::new(&args.output_csv, 100);

    let progress = ProgressBar::new(args.steps as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );

    let started = Instant::now();
    let report_every = args.report_every.max(1);
    let mut step = 0;
    let mut pairing_time = 0u128;
    let mut settlement_time = 0u128;

    while step < args.steps {
        let chunk = report_every.min(args.steps - step);
        match args.mode {
            PlayMode::Sequential => {
                for _ in 0..chunk {
                    society.play_one(&mut rng)?;
                }
            }
            PlayMode::Synchronous => society.play_all(chunk, &mut rng)?,
        }
        step += chunk;

        let stats = society.get_statistics();
        pairing_time += stats.pass_stats.pairing_time;
        settlement_time += stats.pass_stats.settlement_time;
        progress.set_position(step as u64);
        progress.set_message(format!(
            "Coop: {:.2} | Established: {:.2} | Social: {:.2}",
            stats.cooperation_rate(),
            stats.established_rate(),
            stats.avg_social_value()
        ));
        info!(
            "Step {} | Cooperating: {} | Defecting: {} | Established: {:.3} | Social value: {:.3}",
            step,
            stats.cooperating_agents,
            stats.defecting_agents,
            stats.established_rate(),
            stats.avg_social_value()
        );
        csv_exporter.add_stats(step, stats)?;
    }

    progress.finish_with_message("Simulation complete!");
    csv_exporter.finish()?;

    if let Some(path) = &args.snapshot {
        write_snapshot(path, &society)?;
    }

    let stats = society.get_statistics();
    let elapsed = started.elapsed().as_secs_f64();
    println!("\n=== Summary ===");
    println!("Total time: {:.2}s", elapsed);
    println!("Cooperation established: {:.4}", stats.established_rate());
    println!("Currently cooperating: {:.4}", stats.cooperation_rate());
    println!("Average social value: {:.4}", stats.avg_social_value());
    println!("Average exploration rate: {:.4}", stats.avg_exploration_rate());
    if args.mode == PlayMode::Synchronous {
        println!(
            "Pass timings: pairing {:.2}ms, settlement {:.2}ms",
            pairing_time as f64 / 1000.0,
            settlement_time as f64 / 1000.0
        );
    }

    Ok(())
}
