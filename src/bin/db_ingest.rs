//! CLI front-end for the ingest pipeline: load a SQL dump, scatter it across
//! the grid with carrier agents, and write a MYCO1 snapshot (and, optionally,
//! a PPM raster of the placed world).

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use myco_db::ingest::{load_sql, run_ingest, IngestConfig};
use myco_db::persist::save_myco;
use myco_db::raster::save_cluster_ppm;
use myco_db::world::World;

#[derive(Parser)]
#[command(name = "db_ingest")]
#[command(about = "Ingest a SQL dump into a myco-db world and persist it")]
struct Args {
    /// Path to the SQL dump (CREATE TABLE / INSERT statements).
    #[arg(long)]
    input: PathBuf,

    /// Path to write the MYCO1 snapshot to.
    #[arg(long)]
    output: PathBuf,

    /// Optional path to write a PPM raster of the placed world.
    #[arg(long = "db-dump")]
    db_dump: Option<PathBuf>,

    /// Scale factor (cell size in pixels) for the PPM raster.
    #[arg(long = "db-dump-scale", default_value_t = 4)]
    db_dump_scale: usize,

    /// Number of carrier agents to run.
    #[arg(long, default_value_t = 256)]
    agents: usize,

    /// Number of simulation steps to run.
    #[arg(long, default_value_t = 2000)]
    steps: usize,

    /// PRNG seed driving agent placement.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Grid width in cells.
    #[arg(long, default_value_t = 64)]
    width: usize,

    /// Grid height in cells.
    #[arg(long, default_value_t = 64)]
    height: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    info!("Ingest gestartet: input={}", args.input.display());
    let content = fs::read_to_string(&args.input).with_context(|| format!("Ingest-Fehler: kann {} nicht lesen", args.input.display()))?;

    let mut world = World::new();
    load_sql(&content, &mut world).context("SQL-Fehler: Laden des Dumps fehlgeschlagen")?;
    info!("{} Tabellen aus dem Dump geladen", world.tables.len());

    world
        .init_world(args.width, args.height)
        .with_context(|| format!("Ingest-Fehler: ungueltige Gittergroesse {}x{}", args.width, args.height))?;

    let cfg = IngestConfig {
        agent_count: args.agents,
        steps: args.steps,
        seed: args.seed,
        spawn_x: None,
        spawn_y: None,
    };
    run_ingest(&mut world, &cfg).context("Ingest-Fehler: Platzierung der Carrier-Agenten fehlgeschlagen")?;
    info!("{} Payloads platziert", world.payloads.iter().filter(|p| p.placed).count());

    let unplaced = world.payloads.iter().filter(|p| !p.placed).count();
    if unplaced > 0 {
        warn!("{} Payloads blieben unplatziert", unplaced);
    }

    let snapshot = save_myco(&world);
    fs::write(&args.output, snapshot).with_context(|| format!("MYCO-Fehler: kann {} nicht schreiben", args.output.display()))?;
    info!("MYCO1-Snapshot geschrieben nach {}", args.output.display());

    if let Some(dump_path) = &args.db_dump {
        let ppm = save_cluster_ppm(&world, args.db_dump_scale).context("Dump-Fehler: PPM-Rasterung fehlgeschlagen")?;
        fs::write(dump_path, ppm).with_context(|| format!("Dump-Fehler: kann {} nicht schreiben", dump_path.display()))?;
        info!("PPM-Dump geschrieben nach {}", dump_path.display());
    }

    Ok(())
}
