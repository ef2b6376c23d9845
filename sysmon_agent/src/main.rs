//! sysmon_agent: sample probes every tick, keep their history on disk, and stream snapshots
//! to WebSocket viewers.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sysmon_agent::config::{parse_args, AgentConfig};
use sysmon_agent::metrics::SysinfoCpu;
use sysmon_agent::sampler::spawn_sampler;
use sysmon_agent::state::AppState;
use sysmon_agent::ws::router;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sysmon_agent=info,sysmon_rrd=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match parse_args(std::env::args()) {
        Ok(args) => args,
        Err(text) => {
            // --help lands here too; a bad flag is still an error exit.
            let is_help = std::env::args().any(|a| a == "--help" || a == "-h");
            if is_help {
                println!("{text}");
                return Ok(());
            }
            eprintln!("{text}");
            std::process::exit(2);
        }
    };

    init_tracing();

    let mut config = AgentConfig::load(args.config.as_deref()).context("loading configuration")?;
    config.apply_env();
    config.apply_args(&args);

    let data_dir = config.data_dir();
    let state = AppState::from_config(&config, Arc::new(config.serial.system_transport()), || {
        Box::new(SysinfoCpu::new())
    })
    .with_context(|| format!("setting up probes under {}", data_dir.display()))?;

    let sampler = spawn_sampler(state.clone(), config.tick());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        %addr,
        probes = state.probes.len(),
        tick_ms = config.tick_ms,
        data_dir = %data_dir.display(),
        "sysmon_agent listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("server error")?;

    sampler.abort();
    Ok(())
}
