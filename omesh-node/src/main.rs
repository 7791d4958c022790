//! The `omesh` binary: flag parsing, banner, node-identity bootstrap, signal
//! handling, and the HTTP/mesh cooperative loop entry point.
mod cli;
mod config;

use std::process::ExitCode;

use log::{error, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use cli::Args;
use config::Config;
use omesh_common::NodeId;
use omesh_http::{Engine, HttpError};

/// HTTP listener bind/setup failure.
const EXIT_HTTP_INIT_FAILED: u8 = 1;
/// Mesh reactor (listener or notification facility) failed to start.
const EXIT_MESH_INIT_FAILED: u8 = 2;
/// A CLI flag failed validation (bad node id, bad peer spec).
const EXIT_BAD_ARGS: u8 = 3;
/// `--setup` could not create the data directory or persist a node id.
const EXIT_SETUP_FAILED: u8 = 4;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn run(args: Args) -> Result<(), u8> {
    let rng = fastrand::Rng::new();

    if args.setup {
        let data_dir = args.data_dir.clone().map(std::path::PathBuf::from).unwrap_or_else(default_data_dir);
        return run_setup(&data_dir, &rng);
    }

    let data_dir = args.data_dir.clone().map(std::path::PathBuf::from).unwrap_or_else(default_data_dir);
    let node_id = match &args.node_id {
        Some(hex) => NodeId::from_hex(hex).map_err(|err| {
            error!("{err}");
            EXIT_BAD_ARGS
        })?,
        None => NodeId::load_or_create(&data_dir.join("node_id"), &rng).map_err(|err| {
            error!("could not load or create node id: {err}");
            EXIT_SETUP_FAILED
        })?,
    };

    let config = Config::from_args(&args, node_id).map_err(|msg| {
        error!("{msg}");
        EXIT_BAD_ARGS
    })?;

    if args.show_config {
        println!("{}", config.to_json().to_compact_string());
        return Ok(());
    }

    print_banner(&config);
    serve(config)
}

/// Construct the `Engine`, add seed peers, and run the HTTP/mesh cooperative
/// loop until SIGINT/SIGTERM.
fn serve(config: Config) -> Result<(), u8> {
    let mesh_port = if config.mesh_enabled { config.mesh_port } else { 0 };
    let mut engine = Engine::with_peers_path(
        config.node_id.0,
        config.http_port,
        mesh_port,
        &config.data_dir,
        Some(&config.peers_path),
    )
    .map_err(|err| {
        error!("failed to start: {err}");
        match err {
            HttpError::Mesh(_) => EXIT_MESH_INIT_FAILED,
            _ => EXIT_HTTP_INIT_FAILED,
        }
    })?;

    if config.mesh_enabled {
        for (host, port) in &config.seed_peers {
            if let Err(err) = engine.add_seed_peer(host, *port) {
                warn!("could not add seed peer {host}:{port}: {err}");
            }
        }
    } else {
        info!("mesh reactor disabled (--no-mesh)");
    }

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|err| {
        error!("could not install signal handlers: {err}");
        EXIT_HTTP_INIT_FAILED
    })?;

    info!("omesh node {} listening on http=:{} mesh=:{}", config.node_id, config.http_port, config.mesh_port);
    while engine.is_running() {
        if signals.pending().next().is_some() {
            info!("received shutdown signal");
            engine.stop();
            break;
        }
        if let Err(err) = engine.tick() {
            warn!("tick failed: {err}");
        }
    }
    engine.shutdown();
    info!("omesh node {} shut down cleanly", config.node_id);
    Ok(())
}

fn default_data_dir() -> std::path::PathBuf {
    let home = std::env::var_os("HOME").map(std::path::PathBuf::from).unwrap_or_else(|| std::path::PathBuf::from("."));
    home.join(".omesh")
}

fn run_setup(data_dir: &std::path::Path, rng: &fastrand::Rng) -> Result<(), u8> {
    std::fs::create_dir_all(data_dir).map_err(|err| {
        error!("could not create {}: {err}", data_dir.display());
        EXIT_SETUP_FAILED
    })?;
    let node_id = NodeId::load_or_create(&data_dir.join("node_id"), rng).map_err(|err| {
        error!("could not persist node id: {err}");
        EXIT_SETUP_FAILED
    })?;
    println!("omesh: initialized {} with node id {node_id}", data_dir.display());
    Ok(())
}

fn print_banner(config: &Config) {
    info!("omesh {} — distributed full-text search node", env!("CARGO_PKG_VERSION"));
    info!("  node id:    {}", config.node_id);
    info!("  http port:  {}", config.http_port);
    if config.mesh_enabled {
        info!("  mesh port:  {}", config.mesh_port);
    } else {
        info!("  mesh:       disabled");
    }
}
