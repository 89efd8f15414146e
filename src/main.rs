use clap::Parser;
use log::info;

use junction_priority::simulation::{ArbitrationConfig, SimWorld};

#[derive(Parser)]
#[command(name = "junction_priority")]
#[command(about = "Headless junction right-of-way simulation")]
struct Cli {
    /// Number of simulation ticks to run
    #[arg(long, default_value = "1000")]
    ticks: u32,

    /// Time delta per tick in seconds
    #[arg(long, default_value = "0.1")]
    delta: f32,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Trips requested at start and topped up every simulated second
    #[arg(long, default_value = "12")]
    vehicles: usize,

    /// Ticks after which a waiting vehicle is let through
    #[arg(long, default_value_t = junction_priority::simulation::MAX_WAIT_TICKS)]
    max_wait_ticks: u32,

    /// Only log the final summary
    #[arg(long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,junction_priority=info"),
    )
    .init();

    let cli = Cli::parse();
    run_headless(&cli)
}

/// Run the demo grid without graphics
fn run_headless(cli: &Cli) -> anyhow::Result<()> {
    info!("Running junction simulation in headless mode...");
    info!("Ticks: {}, Delta: {}s", cli.ticks, cli.delta);

    let config = ArbitrationConfig {
        max_wait_ticks: cli.max_wait_ticks,
        ..ArbitrationConfig::default()
    };
    let mut world = SimWorld::create_demo_world(config, cli.seed)?;
    world.spawn_random_trips(cli.vehicles);

    // Calculate how many ticks equal 1 second of simulation time
    let ticks_per_second = (1.0 / cli.delta).ceil().max(1.0) as u32;

    if !cli.quiet {
        info!("Initial state:");
        world.log_summary();
    }

    let mut tick = 0;
    while tick < cli.ticks {
        let ticks_to_run = ticks_per_second.min(cli.ticks - tick);
        for _ in 0..ticks_to_run {
            tick += 1;
            world.tick(cli.delta);
        }

        let missing = cli.vehicles.saturating_sub(world.vehicles.len());
        world.spawn_random_trips(missing);

        if !cli.quiet {
            info!(
                "--- After tick {} ({:.1}s simulated time) ---",
                tick,
                tick as f32 * cli.delta
            );
            world.log_summary();
        }
    }

    info!("=== SIMULATION COMPLETE ===");
    world.log_summary();
    Ok(())
}
