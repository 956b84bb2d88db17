//! Launcher binary.
//!
//! Usage:
//!   cargo run -p physync_app -- <server|client> [--addr 127.0.0.1:56789]
//!       [--interval-ms 1000] [--tick-hz 60] [--gravity-scale 0.0]
//!       [--config sync.json] [--run-secs N]
//!
//! Server mode simulates the bodies, listens for clients, and broadcasts the
//! snapshot set on a fixed interval. Client mode connects to the server and
//! mirrors the received state into its own local world.
//!
//! Flags apply in order, so flags after `--config` override the file.
//! Ctrl-C (or `--run-secs` elapsing) stops the simulation loop, signals every
//! background loop to stop, and waits for them to exit.

use std::{
    env,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use physync_client::SyncClient;
use physync_server::SyncServer;
use physync_shared::{
    adapter::{try_lock_world, SimulationAdapter},
    config::{Role, SyncConfig},
    lifecycle::Lifecycle,
    physics::{KinematicWorld, PhysicsBackend, PhysicsConfig},
    snapshot::SnapshotStore,
};
use tokio::time::Instant;
use tracing::{info, warn};

/// Seconds between status lines.
const STATUS_EVERY_SECS: u64 = 5;

struct Args {
    role: Role,
    cfg: SyncConfig,
    run_for: Option<Duration>,
}

fn flag_value<'a>(args: &'a [String], i: usize) -> anyhow::Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .with_context(|| format!("{} needs a value", args[i]))
}

fn parse_args(args: &[String]) -> anyhow::Result<Args> {
    let role: Role = args
        .get(1)
        .context("missing mode: expected 'server' or 'client'")?
        .parse()?;

    let mut cfg = SyncConfig::default();
    let mut run_for = None;
    let mut i = 2;
    while i < args.len() {
        let value = flag_value(args, i);
        match args[i].as_str() {
            "--config" => {
                let path = value?;
                let text = std::fs::read_to_string(path).with_context(|| format!("read config {path}"))?;
                cfg = SyncConfig::from_json_str(&text).with_context(|| format!("parse config {path}"))?;
            }
            "--addr" => cfg.server_addr = value?.to_string(),
            "--interval-ms" => cfg.broadcast_interval_ms = value?.parse().context("--interval-ms")?,
            "--tick-hz" => cfg.tick_hz = value?.parse().context("--tick-hz")?,
            "--gravity-scale" => cfg.gravity_scale = value?.parse().context("--gravity-scale")?,
            "--run-secs" => {
                let secs: f32 = value?.parse().context("--run-secs")?;
                run_for = Some(Duration::try_from_secs_f32(secs).context("--run-secs")?);
            }
            other => anyhow::bail!("unknown argument '{other}'"),
        }
        i += 2;
    }
    Ok(Args { role, cfg, run_for })
}

/// Simulation ticks between status lines.
fn status_every(tick_hz: u32) -> u64 {
    u64::from(tick_hz.max(1)) * STATUS_EVERY_SECS
}

/// Resolves on Ctrl-C or once `run_for` has elapsed.
async fn shutdown_signal(run_for: Option<Duration>) {
    let deadline = async {
        match run_for {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(error = %e, "Ctrl-C handler unavailable, stopping");
            }
        }
        _ = deadline => info!("Run time elapsed"),
    }
}

async fn run_server(cfg: SyncConfig, run_for: Option<Duration>) -> anyhow::Result<()> {
    let lifecycle = Lifecycle::new();
    let store = Arc::new(SnapshotStore::new());
    let adapter = SimulationAdapter::new(Arc::clone(&store));
    let mut world = KinematicWorld::new(PhysicsConfig::with_gravity_scale(cfg.gravity_scale));

    // Clients connecting before the first step still get a real frame.
    let _ = adapter.capture(&world)?;

    let server = SyncServer::new(cfg.clone(), store, lifecycle.clone());
    let tasks = server.start();

    let dt = cfg.tick_interval();
    let status_every = status_every(cfg.tick_hz);
    let shutdown = shutdown_signal(run_for);
    tokio::pin!(shutdown);

    let mut next_tick = Instant::now();
    let mut tick: u64 = 0;
    let mut skipped: u64 = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep_until(next_tick) => {}
        }
        world.step(dt.as_secs_f32());
        if adapter.capture(&world)?.is_skipped() {
            skipped += 1;
        }
        tick += 1;
        if tick % status_every == 0 {
            let body = world.current_state(0);
            info!(
                tick,
                skipped,
                clients = server.registry().len(),
                x = body.position.x,
                y = body.position.y,
                "Simulation"
            );
        }
        next_tick += dt;
    }

    info!(tick, "Simulation loop stopped");
    lifecycle.signal_stop();
    let exit = tasks.join().await;
    if let Err(e) = &exit.network {
        warn!(error = %format!("{e:#}"), "Network task ended with an error");
    }
    Ok(())
}

async fn run_client(cfg: SyncConfig, run_for: Option<Duration>) -> anyhow::Result<()> {
    let lifecycle = Lifecycle::new();
    let store = Arc::new(SnapshotStore::new());
    let world = Arc::new(Mutex::new(KinematicWorld::new(PhysicsConfig::with_gravity_scale(
        cfg.gravity_scale,
    ))));

    let client = SyncClient::new(cfg.clone(), Arc::clone(&store), lifecycle.clone());
    let network = client.start(Arc::clone(&world));

    let dt = cfg.tick_interval();
    let status_every = status_every(cfg.tick_hz);
    let shutdown = shutdown_signal(run_for);
    tokio::pin!(shutdown);

    let mut next_tick = Instant::now();
    let mut tick: u64 = 0;
    let mut skipped: u64 = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep_until(next_tick) => {}
        }
        // The receiver may be writing into the world; never wait for it.
        match try_lock_world(&world) {
            Some(mut w) => {
                w.step(dt.as_secs_f32());
                tick += 1;
                if tick % status_every == 0 {
                    let body = w.current_state(0);
                    info!(
                        tick,
                        skipped,
                        synced = store.is_initialized(),
                        frames = store.generation(),
                        x = body.position.x,
                        y = body.position.y,
                        "Simulation"
                    );
                }
            }
            None => skipped += 1,
        }
        next_tick += dt;
    }

    info!(tick, "Simulation loop stopped");
    lifecycle.signal_stop();
    match network.await.context("network task panicked")? {
        Ok(stats) => info!(frames = stats.frames, applied = stats.applied, "Network task exited"),
        Err(e) => warn!(error = %format!("{e:#}"), "Network task ended with an error"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let Args { role, cfg, run_for } = parse_args(&args)?;
    info!(
        %role,
        config = %serde_json::to_string(&cfg).context("serialize config")?,
        "Starting"
    );

    match role {
        Role::Server => run_server(cfg, run_for).await,
        Role::Client => run_client(cfg, run_for).await,
    }
}
