//! `shadow`: the engine's command-line front end. Parses the CLI surface of
//! spec.md §6, assembles a built-in in-memory topology (see `scenario`, the
//! stand-in for the out-of-scope XML front end), and drives
//! `shadow_engine::Engine` to completion.

mod cli;
mod scenario;

use anyhow::{Context, Result};
use clap::Parser;

use shadow_engine::{Engine, EngineConfig};
use shadow_log::Level;
use shadow_nic::QueueDiscipline;
use shadow_time::SimTime;

fn build_config(args: &cli::Args) -> Result<EngineConfig> {
    let log_level: Level = args.log_level.parse().map_err(anyhow::Error::msg)?;
    let heartbeat_log_level: Level = args.heartbeat_log_level.parse().map_err(anyhow::Error::msg)?;
    let interface_qdisc: QueueDiscipline = args.interface_qdisc.parse().map_err(anyhow::Error::msg)?;

    Ok(EngineConfig {
        log_level,
        heartbeat_log_level,
        heartbeat_interval_secs: args.heartbeat_frequency,
        seed: args.seed,
        workers: args.workers,
        cpu_threshold_us: args.cpu_threshold_us,
        cpu_precision_us: args.cpu_precision_us,
        interface_batch_ms: args.interface_batch_ms,
        interface_buffer_bytes: args.interface_buffer_bytes,
        interface_qdisc,
        runahead_ms: args.runahead,
        tcp_window_packets: args.tcp_window_packets,
        socket_recv_buffer_bytes: args.socket_recv_buffer_bytes,
        socket_send_buffer_bytes: args.socket_send_buffer_bytes,
        tcp_backlog: EngineConfig::default().tcp_backlog,
        udp_recv_queue_len: EngineConfig::default().udp_recv_queue_len,
        kill_time: args.kill_time_ms.map(SimTime::from_millis),
        pcap_dir: args.pcap_dir.clone(),
    })
}

fn run(args: cli::Args) -> Result<()> {
    let config = build_config(&args).context("invalid configuration")?;
    shadow_log::init(config.log_level);

    tracing::info!(scenario = %args.scenario, seed = config.seed, "building topology");
    let built = scenario::build(&args.scenario, &config).context("failed to build scenario")?;

    let engine = Engine::new(config, built.hosts).context("failed to set up engine")?;
    let report = engine.run().context("simulation run failed")?;
    report.log_summary(Level::Message);

    Ok(())
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    run(args)
}
