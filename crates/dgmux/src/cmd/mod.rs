use clap::{Args, Subcommand};
use std::path::PathBuf;

use dgmux_transport::DEFAULT_MAX_DATAGRAM_SIZE;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod fragment;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the packets a payload is split into.
    Fragment(FragmentArgs),
    /// Run a server and clients over the in-memory network.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Fragment(args) => fragment::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Version(args) => version::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct FragmentArgs {
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["file", "size"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "size"])]
    pub file: Option<PathBuf>,
    /// Generate a payload of this many bytes.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub size: Option<usize>,
    /// Largest datagram the transport accepts.
    #[arg(long, default_value_t = DEFAULT_MAX_DATAGRAM_SIZE)]
    pub datagram_size: usize,
    /// Fragment budget per message.
    #[arg(long, default_value_t = dgmux_frame::DEFAULT_MAX_FRAGMENTS)]
    pub max_fragments: usize,
    /// Message id stamped on every fragment.
    #[arg(long, default_value_t = 0)]
    pub message_id: u32,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// JSON configuration file shared by server and clients.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Number of clients.
    #[arg(long, default_value_t = 2)]
    pub clients: usize,
    /// Messages each connected client sends.
    #[arg(long, default_value_t = 3)]
    pub messages: usize,
    /// Payload size of every message in bytes.
    #[arg(long, default_value_t = 64)]
    pub size: usize,
    /// Application channel to send on.
    #[arg(long, short = 'c', default_value_t = 0)]
    pub channel: u8,
    /// Deliver datagrams to the server in reverse order.
    #[arg(long)]
    pub reverse: bool,
    /// Override the server's connection capacity.
    #[arg(long)]
    pub max_connections: Option<usize>,
    /// Largest datagram the in-memory network accepts.
    #[arg(long, default_value_t = DEFAULT_MAX_DATAGRAM_SIZE)]
    pub datagram_size: usize,
    /// Have the server echo every message back.
    #[arg(long)]
    pub echo: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
