//! flashgraph entrypoint: wire configuration, graph, and data manager
//! together and drive a deterministic smoke workload through the
//! simulated device, dumping per-epoch statistics as JSON lines.

use anyhow::{Context, Result, bail};
use clap::Parser;
use core_config::{DeviceConfig, WorkloadConfig};
use core_data::{DataManager, NodeFeature};
use core_graph::{BlockSpec, Graph};
use core_sim::Module;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "flashgraph", version, about = "SSD-embedded GNN accelerator simulator")]
struct Args {
    /// Graph directory containing b<block-size>/header.toml. Omitted: a
    /// synthetic graph is generated instead.
    graph: Option<PathBuf>,
    /// Block size in bytes used when the graph was partitioned.
    #[arg(long, default_value_t = 65536)]
    block_size: u32,
    /// Directory holding device.toml and workload.toml.
    #[arg(long, default_value = "configs")]
    config_dir: PathBuf,
    /// Vertex count of the synthetic graph when no path is given.
    #[arg(long, default_value_t = 4096)]
    synthetic_verts: u32,
    /// Override the workload's node feature dimension.
    #[arg(long)]
    node_feature_dim: Option<u32>,
    /// Override the transfer buffer capacity in bytes.
    #[arg(long)]
    buffer_capacity: Option<u64>,
    #[arg(long)]
    aggregator_latency: Option<u64>,
    #[arg(long)]
    pe_latency: Option<u64>,
    /// Loads per epoch of the smoke workload.
    #[arg(long)]
    batch_size: Option<u32>,
    #[arg(long)]
    seed: Option<u64>,
    /// Epochs to run.
    #[arg(long, default_value_t = 2)]
    epochs: u32,
    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

/// Evenly partitioned stand-in graph for runs without real graph data.
fn synthetic_graph(nverts: u32, block_size: u32) -> Result<Graph> {
    const VERTS_PER_BLOCK: u32 = 8;
    let nblocks = nverts.div_ceil(VERTS_PER_BLOCK);
    let mut specs = Vec::with_capacity(nblocks as usize);
    let mut elo = 0u64;
    for b in 0..nblocks {
        let vlo = b * VERTS_PER_BLOCK;
        let vup = ((b + 1) * VERTS_PER_BLOCK).min(nverts);
        let odg = (vup - vlo) * 4;
        specs.push(BlockSpec { vlo, vup, elo, odg, idg: u64::from(odg), dense: false });
        elo += u64::from(odg);
    }
    Ok(Graph::from_parts(false, nverts, elo, block_size, specs)?)
}

fn load_configs(args: &Args) -> Result<(DeviceConfig, WorkloadConfig)> {
    let device_path = args.config_dir.join("device.toml");
    let device = if device_path.exists() {
        core_config::load_device(&device_path)?
    } else {
        warn!(target: "runtime", path = %device_path.display(), "no device config, using defaults");
        let device = DeviceConfig::default();
        device.validate()?;
        device
    };

    let workload_path = args.config_dir.join("workload.toml");
    let mut workload = if workload_path.exists() {
        core_config::load_workload(&workload_path)?
    } else {
        warn!(target: "runtime", path = %workload_path.display(), "no workload config, using defaults");
        WorkloadConfig::default()
    };
    if let Some(dim) = args.node_feature_dim {
        workload.feature.node_feature_dim = dim;
    }
    if let Some(capacity) = args.buffer_capacity {
        workload.buffers.transfer_capacity = capacity;
    }
    if let Some(latency) = args.aggregator_latency {
        workload.compute.aggregator_latency = latency;
    }
    if let Some(latency) = args.pe_latency {
        workload.compute.pe_latency = latency;
    }
    if let Some(batch) = args.batch_size {
        workload.query.batch_size = batch;
    }
    if let Some(seed) = args.seed {
        workload.query.seed = seed;
    }
    workload.validate()?;
    Ok((device, workload))
}

/// Issue one batch of edge-list and feature loads plus compute slots,
/// then drain the device to quiescence.
fn run_epoch(dm: &mut DataManager, rng: &mut SmallRng, batch_size: u32) -> Result<()> {
    let nverts = dm.graph().global().nverts;
    let fired = Rc::new(Cell::new(0u32));
    let mut issued = 0u32;
    let counting = |fired: &Rc<Cell<u32>>| {
        let fired = Rc::clone(fired);
        Box::new(move || fired.set(fired.get() + 1))
    };

    for _ in 0..batch_size {
        let vid = rng.random_range(0..nverts);
        dm.load_edge_list_to_dram(vid, counting(&fired))?;
        dm.load_node_feature_to_dram(&NodeFeature::input(vid), counting(&fired))?;
        dm.aggregate(counting(&fired));
        dm.combine(counting(&fired));
        issued += 4;
    }

    let mut guard = 0u64;
    while dm.busy() {
        dm.skip_to_next_event();
        guard += 1;
        if guard > 50_000_000 {
            bail!("simulation failed to drain");
        }
    }
    if fired.get() != issued {
        bail!("callback accounting drifted: {} fired of {issued}", fired.get());
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.log_file.as_ref())?;

    let (device, workload) = load_configs(&args)?;
    let graph = match &args.graph {
        Some(path) => Graph::import(path, args.block_size)
            .with_context(|| format!("import graph from {}", path.display()))?,
        None => synthetic_graph(args.synthetic_verts, args.block_size)?,
    };
    info!(
        target: "runtime",
        nverts = graph.global().nverts,
        nblocks = graph.global().nblocks,
        batch_size = workload.query.batch_size,
        "starting"
    );

    let mut dm = DataManager::new(device, graph, &workload)?;
    let mut rng = SmallRng::seed_from_u64(workload.query.seed);

    for epoch in 0..args.epochs {
        run_epoch(&mut dm, &mut rng, workload.query.batch_size)
            .with_context(|| format!("epoch {epoch}"))?;
        let summary = serde_json::json!({
            "epoch": epoch,
            "cycle": dm.cycle(),
            "structure": dm.structure_stats(),
            "feature": dm.feature_stats(),
            "bus_bytes": dm.io_stats().total_bus_traffic(),
            "flash_read_bytes": dm.io_stats().total_read_traffic(),
        });
        println!("{summary}");
        dm.end_epoch();
    }

    info!(target: "runtime", cycles = dm.cycle(), "simulation finished");
    Ok(())
}
