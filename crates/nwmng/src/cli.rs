//! Clap derive structures for the `nwmng` binary and its interactive shell.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use nwmng_core::Address;
use uuid::Uuid;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// nwmng -- provision and configure a BLE Mesh network through an NCP
#[derive(Debug, Parser)]
#[command(
    name = "nwmng",
    version,
    about = "Provision and configure BLE Mesh nodes through a network co-processor",
    long_about = "Drives a BLE Mesh NCP: brings up the network, admits beaconing \
        devices, provisions them and pushes their configuration.\n\n\
        Transport arguments are remembered in an argument cache between runs."
)]
pub struct Cli {
    /// Link to the NCP: secure (socket) or insecure (serial)
    #[arg(long, short = 'm', value_enum)]
    pub mode: Option<Mode>,

    /// Serial port of the NCP (insecure mode)
    #[arg(long, short = 'p')]
    pub port: Option<String>,

    /// Serial baud rate (insecure mode)
    #[arg(long, short = 'b')]
    pub baud_rate: Option<u32>,

    /// Socket server path (secure mode)
    #[arg(long, short = 's')]
    pub sock_server: Option<PathBuf>,

    /// Socket client path (secure mode)
    #[arg(long, short = 'c')]
    pub sock_client: Option<PathBuf>,

    /// Encrypt the socket link (secure mode)
    #[arg(long, short = 'e')]
    pub sock_encrypted: Option<bool>,

    /// Startup argument cache
    #[arg(long, env = "NWMNG_ARGS_CACHE")]
    pub args_cache: Option<PathBuf>,

    /// Provisioner profile (TOML)
    #[arg(long, short = 'f', env = "NWMNG_PROFILE")]
    pub profile_path: Option<PathBuf>,

    /// Run against a simulated NCP with N beaconing devices
    #[arg(long, value_name = "N")]
    pub simulate: Option<usize>,

    /// When to use color output
    #[arg(long, default_value = "auto")]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Secure,
    Insecure,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Shell ────────────────────────────────────────────────────────────

/// One line typed at the `nwmng>` prompt.
#[derive(Debug, Parser)]
#[command(
    name = "nwmng>",
    no_binary_name = true,
    disable_version_flag = true,
    help_template = "{subcommands}"
)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

#[derive(Debug, Subcommand)]
pub enum ShellCommand {
    /// Show provisioned nodes and devices waiting to be provisioned
    #[command(alias = "ls")]
    List,

    /// Show unknown devices collected in free mode
    Backlog,

    /// Make a backlog device eligible for provisioning
    Promote { uuid: Uuid },

    /// Never provision this device
    Blacklist { uuid: Uuid },

    /// Reset a node and remove it from the network
    #[command(alias = "rm")]
    Remove { address: Address },

    /// Collect unknown beaconing devices into the backlog
    Free { state: Switch },

    /// Start or stop scanning for beacons
    Scan { state: Switch },

    /// Show provisioning and configuration counters
    Stats,

    /// Restart the network worker
    Restart,

    /// Leave the shell
    #[command(alias = "exit", alias = "q")]
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        self == Self::On
    }
}
