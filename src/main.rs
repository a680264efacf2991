/*
    Runs a simulated news cluster in one process.

    Every node watches the leader it heard from directly, stands for election
    once its sampled neighborhood settles and nobody around it knows more, and
    forwards the news it authors to the leader. The leader numbers each item
    and pushes it to its best-ranked neighbors; everyone else catches up by
    pulling from neighbors that hold more. Crashing the leader mid-run shows
    detection, re-election and the log converging again.
*/

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use simple_news::common::config::Config;
use simple_news::sim::cluster::{Cluster, SimulationConfig};

#[derive(Parser, Debug)]
#[command(name = "simple-news")]
#[command(about = "Leader-sequenced news dissemination over a simulated cluster")]
struct Args {
    /// TOML file with [detector], [election], [news] and [simulation] tables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of nodes (overrides [simulation].nodes)
    #[arg(short, long)]
    nodes: Option<usize>,

    /// Neighbors per sample (overrides [simulation].neighbors)
    #[arg(long)]
    neighbors: Option<usize>,

    /// Random fingers per sample (overrides [simulation].fingers)
    #[arg(long)]
    fingers: Option<usize>,

    /// Fraction of datagrams dropped (overrides [simulation].loss_rate)
    #[arg(long)]
    loss: Option<f64>,

    /// Length of the run in seconds
    #[arg(short, long, default_value_t = 120)]
    duration: u64,

    /// Milliseconds between published items, 0 to publish nothing
    #[arg(long, default_value_t = 2000)]
    publish_every: u64,

    /// Crash the agreed leader this many seconds into the run
    #[arg(long)]
    crash_leader_at: Option<u64>,
}

#[derive(Deserialize, Default)]
struct SimulationFile {
    #[serde(default)]
    simulation: SimulationConfig,
}

fn load(args: &Args) -> Result<(Config, SimulationConfig)> {
    let (config, mut simulation) = match &args.config {
        Some(path) => {
            let config = Config::load(path).with_context(|| format!("loading {}", path.display()))?;
            let text = std::fs::read_to_string(path)?;
            let file: SimulationFile = toml::from_str(&text).context("parsing [simulation]")?;
            (config, file.simulation)
        }
        None => (Config::default(), SimulationConfig::default()),
    };

    if let Some(nodes) = args.nodes {
        simulation.nodes = nodes;
    }
    if let Some(neighbors) = args.neighbors {
        simulation.neighbors = neighbors;
    }
    if let Some(fingers) = args.fingers {
        simulation.fingers = fingers;
    }
    if let Some(loss) = args.loss {
        simulation.loss_rate = loss;
    }
    anyhow::ensure!(simulation.nodes > 0, "a cluster needs at least one node");
    Ok((config, simulation))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let (config, simulation) = load(&args)?;
    info!(
        "running {} nodes for {}s ({} neighbors, {} fingers, loss {})",
        simulation.nodes, args.duration, simulation.neighbors, simulation.fingers, simulation.loss_rate
    );

    let cluster = Cluster::start(simulation, config);
    let start = Instant::now();
    let end = start + Duration::from_secs(args.duration);
    let mut crash_at = args.crash_leader_at.map(|secs| start + Duration::from_secs(secs));

    let mut publisher = interval(Duration::from_millis(args.publish_every.max(1)));
    publisher.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut reporter = interval(Duration::from_secs(10));
    let mut published = 0u64;

    while Instant::now() < end {
        tokio::select! {
            _ = publisher.tick(), if args.publish_every > 0 => {
                let live = cluster.live().await;
                let Some(author) = live.choose(&mut rand::thread_rng()).copied() else {
                    continue;
                };
                let title = format!("news-{}", published);
                match cluster.publish(&author, title).await {
                    Ok(()) => published += 1,
                    Err(e) => warn!("{}", e),
                }
            }
            _ = reporter.tick() => {
                info!("{:?}", cluster.summary().await);
            }
            _ = tokio::time::sleep_until(end) => break,
        }

        if crash_at.is_some_and(|at| Instant::now() >= at) {
            match cluster.agreed_leader().await {
                Some(leader) => {
                    crash_at = None;
                    cluster.crash(&leader).await?;
                }
                None => warn!("no agreed leader to crash yet, retrying"),
            }
        }
    }

    let summary = cluster.summary().await;
    info!("published {} items", published);
    info!("{:?}", summary);
    if summary.converged() {
        info!("converged on one leader with {} committed items", summary.max_committed);
    } else {
        warn!("cluster did not converge");
    }

    cluster.shutdown().await;
    Ok(())
}
