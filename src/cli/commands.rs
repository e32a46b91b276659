//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - discover: scan the network for console engines
//! - watch: follow the monitor section
//! - get/set/subscribe: raw protocol access
//! - volume/mute/dim/mono: monitor actions
//! - hosts: manage the known-hosts book

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// monitorctl - Monitor control for UA Console engines
#[derive(Parser, Debug)]
#[command(name = "monitorctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine host (overrides config and the selected host)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Engine port
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan the local network for console engines
    Discover {
        /// Scan duration in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Connect and print monitor changes until interrupted (default)
    Watch,

    /// Request a path and print the decoded reply
    Get {
        /// Protocol path, e.g. /devices
        path: String,

        /// Seconds to wait for replies
        #[arg(short, long, default_value_t = 2)]
        wait: u64,
    },

    /// Write a number or boolean to a path
    Set {
        /// Protocol path
        path: String,

        /// Value: true, false or a number
        #[arg(allow_hyphen_values = true)]
        value: String,
    },

    /// Subscribe to a path and stream updates until interrupted
    Subscribe {
        /// Protocol path
        path: String,
    },

    /// Monitor level
    Volume {
        #[command(subcommand)]
        command: VolumeCommands,
    },

    /// Toggle monitor mute
    Mute,

    /// Toggle monitor dim
    Dim,

    /// Toggle mono fold-down
    Mono,

    /// Known hosts
    Hosts {
        #[command(subcommand)]
        command: HostsCommands,
    },
}

/// Volume subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum VolumeCommands {
    /// Raise by one step
    Up,

    /// Lower by one step
    Down,

    /// Set the slider position
    Set {
        /// Position from 0 to 100
        #[arg(value_parser = clap::value_parser!(f64))]
        volume: f64,
    },

    /// Set the level in dB
    Db {
        /// Level, e.g. -24
        #[arg(allow_negative_numbers = true)]
        db: f64,
    },
}

/// Known-hosts subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HostsCommands {
    /// List localhost, manual hosts and the selection
    List,

    /// Add a manual host (port from --port)
    Add {
        /// Host address
        address: String,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Remove a manual host
    Remove {
        /// Host address
        address: String,
    },

    /// Use this host by default
    Select {
        /// Host address
        address: String,
    },
}
