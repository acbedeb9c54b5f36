//! Command-line argument definitions.

use clap::Parser;
use std::path::PathBuf;

/// Probe a VPN server and report which protocol Smart Protocol would pick
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Settings file (.toml or .json)
    #[arg(short, long, env = "VPN_PROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Server catalog file (.toml or .json)
    #[arg(long, conflicts_with = "host")]
    pub catalog: Option<PathBuf>,

    /// Server id in the catalog (defaults to the active server)
    #[arg(short, long, requires = "catalog")]
    pub server: Option<String>,

    /// Probe this hostname or IP directly instead of a catalog entry
    #[arg(long)]
    pub host: Option<String>,

    /// OpenVPN UDP candidate ports
    #[arg(long, value_delimiter = ',')]
    pub udp_ports: Option<Vec<u16>>,

    /// OpenVPN TCP candidate ports
    #[arg(long, value_delimiter = ',')]
    pub tcp_ports: Option<Vec<u16>>,

    /// IKEv2 candidate ports
    #[arg(long, value_delimiter = ',')]
    pub ike_ports: Option<Vec<u16>>,

    /// Remote default-ports document ({"DefaultPorts": {"UDP": [..], "TCP": [..]}})
    #[arg(long)]
    pub remote_config: Option<PathBuf>,

    /// Per-protocol probe budget in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Also probe WireGuard
    #[arg(long)]
    pub wireguard: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
