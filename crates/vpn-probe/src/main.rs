//! vpn-probe: Smart Protocol from the command line
//!
//! Loads settings and a server catalog, probes one server with every
//! enabled availability checker and prints the decision.

mod args;

use anyhow::{bail, Context, Result};
use args::Args;
use clap::Parser;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vpn_core::{
    ProbeSettings, ServerCatalog, ServerProbeTarget, SmartProtocol, SmartProtocolConfig,
    StaticCatalog, VpnProtocol,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => ProbeSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => ProbeSettings::default(),
    };

    init_logging(&settings.logging.level, args.verbose);

    let config = smart_protocol_config(&args, settings.smart_protocol)?;
    let target = probe_target(&args)?;

    info!("vpn-probe starting ({} on {})", target.server_id, target.domain);

    let smart = SmartProtocol::new(config);
    let decision = smart.determine_best_protocol(&target).await;

    println!("{}\t{}", target.server_id, decision);

    if !decision.has_ports() {
        warn!("No protocol answered on {}", target.domain);
        std::process::exit(2);
    }

    Ok(())
}

fn init_logging(level: &str, verbose: u8) {
    let level = match verbose {
        0 => level,
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn smart_protocol_config(args: &Args, mut config: SmartProtocolConfig) -> Result<SmartProtocolConfig> {
    if let Some(path) = &args.remote_config {
        let json = read(path).context("reading remote port config")?;
        config.apply_remote_json(&json);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if args.wireguard {
        config.wireguard = true;
    }
    Ok(config)
}

fn probe_target(args: &Args) -> Result<ServerProbeTarget> {
    let mut target = match (&args.host, &args.catalog) {
        (Some(host), _) => ServerProbeTarget::new(host.clone(), host.clone()),
        (None, Some(path)) => {
            let catalog = StaticCatalog::load(path)
                .with_context(|| format!("loading catalog from {}", path.display()))?;
            let found = match &args.server {
                Some(id) => catalog.target(id),
                None => catalog.active_target(),
            };
            match found {
                Some(target) => target,
                None => bail!("server {} not found in catalog", args.server.as_deref().unwrap_or("(active)")),
            }
        }
        (None, None) => bail!("either --host or --catalog is required"),
    };

    let overrides = [
        (VpnProtocol::OpenVpnUdp, &args.udp_ports),
        (VpnProtocol::OpenVpnTcp, &args.tcp_ports),
        (VpnProtocol::Ike, &args.ike_ports),
    ];
    for (protocol, ports) in overrides {
        if let Some(ports) = ports {
            target = target.with_ports(protocol, ports.clone());
        }
    }

    Ok(target)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}
