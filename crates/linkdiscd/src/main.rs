//! Link Discovery Daemon
//!
//! Main entry point for linkdiscd. The `run` command drives the discovery
//! engine over the simulated fabric described in the `[lab]` section of the
//! configuration file and prints link events as JSON lines until Ctrl-C.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sonic_linkdiscd::config::DEFAULT_CONFIG_PATH;
use sonic_linkdiscd::{
    DiscoveryEngine, Dpid, Fabric, InterceptRule, LabConfig, LinkdiscConfig, MacAddress, PortDesc,
    PortNo, Transport,
};
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// SONiC LLDP link discovery daemon
#[derive(Parser, Debug)]
#[command(name = "linkdiscd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run discovery over the lab fabric until interrupted
    Run {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Check a configuration file and print the effective settings
    Validate {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Run {
        config: PathBuf::from(DEFAULT_CONFIG_PATH),
    });

    match command {
        Command::Run { config } => {
            let found = config.exists();
            let settings = LinkdiscConfig::load_or_default(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            init_logging(&settings.logging.level, args.json_logs)?;
            if !found {
                warn!(path = %config.display(), "linkdiscd: Config file not found, using defaults");
            }
            settings.validate().context("invalid configuration")?;
            run_daemon(settings).await
        }
        Command::Validate { config } => validate(&config),
    }
}

/// Initialize structured logging. RUST_LOG overrides the configured level.
fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let result = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.compact().finish())
    };
    result.map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let config = LinkdiscConfig::load(path).with_context(|| format!("loading {}", path.display()))?;
    config.validate().context("invalid configuration")?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Locally administered MAC for a lab port
fn lab_port(dpid: Dpid, port_no: PortNo) -> PortDesc {
    let d = dpid.to_be_bytes();
    let p = port_no.to_be_bytes();
    PortDesc {
        port_no,
        hw_addr: MacAddress([0x02, d[6], d[7], p[1], p[2], p[3]]),
        admin_down: false,
        link_down: false,
    }
}

fn bring_up_lab(lab: &LabConfig, fabric: &Fabric, engine: &DiscoveryEngine) {
    for link in &lab.links {
        let (a, b) = link.endpoints();
        fabric.connect(a, b);
    }
    for switch in &lab.switches {
        // stands in for the flow-table manager on switch join
        fabric.install_discovery_intercept_rule(switch.dpid, InterceptRule::lldp());
        let ports: Vec<PortDesc> = switch
            .ports
            .iter()
            .map(|&port_no| lab_port(switch.dpid, port_no))
            .collect();
        engine.on_switch_connected(switch.dpid, &ports);
    }
}

async fn run_daemon(config: LinkdiscConfig) -> anyhow::Result<()> {
    info!("linkdiscd: Starting link discovery daemon");

    let (fabric, frames) = Fabric::new();
    let (engine, mut events) = DiscoveryEngine::new(config.discovery.clone(), fabric.clone())?;
    let tasks = engine.spawn();

    let shutdown = CancellationToken::new();
    let delivery = tokio::spawn(fabric.clone().run(frames, engine.clone(), shutdown.clone()));

    if config.lab.switches.is_empty() {
        warn!("linkdiscd: No lab switches configured, nothing to discover");
    }
    bring_up_lab(&config.lab, &fabric, &engine);
    info!(
        switches = config.lab.switches.len(),
        cables = config.lab.links.len(),
        "linkdiscd: Lab fabric up"
    );

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("waiting for Ctrl-C")?;
                info!("linkdiscd: Received SIGINT");
                break;
            }
            Some(event) = events.recv() => {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    let links = engine.list_links(None);
    println!("{}", serde_json::to_string_pretty(&links)?);

    tasks.shutdown().await;
    shutdown.cancel();
    if let Err(e) = delivery.await {
        warn!(error = %e, "linkdiscd: Fabric delivery task failed");
    }

    info!("linkdiscd: Graceful shutdown complete");
    Ok(())
}
