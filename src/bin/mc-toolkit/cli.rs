use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use mc_toolkit::transport::udp::DEFAULT_CONTROL_PORT;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum JsonProgressArg {
    /// Emit every progress event the uploader reports.
    Pages,
    /// Do not emit progress events.
    None,
}

#[derive(Parser)]
#[command(name = "mc-toolkit")]
#[command(about = "Make Controller firmware upload (SAM-BA) and OSC control")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Upload a raw firmware binary through the SAM-BA boot monitor.
    Upload(UploadArgs),

    /// List boot monitors and running boards on USB serial ports.
    List(ListArgs),

    /// Decode a chip-id word (e.g. 0x275B0940) without a device.
    Chip(ChipArgs),

    /// Send one OSC message to a running board and print the replies.
    Send(SendArgs),
}

#[derive(Parser)]
pub struct UploadArgs {
    /// Path to the raw firmware binary.
    pub image: PathBuf,

    /// Serial port of the boot monitor (auto-detected when only one is present).
    #[arg(long)]
    pub port: Option<String>,

    /// Directory holding loader128.bin and/or loader256.bin.
    #[arg(long)]
    pub loader_dir: Option<PathBuf>,

    /// Loader image for chips with 128-byte flash pages.
    #[arg(long)]
    pub loader_128: Option<PathBuf>,

    /// Loader image for chips with 256-byte flash pages.
    #[arg(long)]
    pub loader_256: Option<PathBuf>,

    /// Leave the chip halted after setting the boot bit.
    #[arg(long)]
    pub no_reset: bool,

    /// Report progress every N pages.
    #[arg(long, default_value_t = 5)]
    pub progress_every: usize,

    /// Max time to wait for a monitor reply.
    #[arg(long, default_value_t = 3000)]
    pub reply_timeout_ms: u64,

    /// Emit JSON line events to stdout.
    #[arg(long)]
    pub json: bool,

    /// Include monotonic timestamps in JSON events (milliseconds since process start).
    #[arg(long, requires = "json")]
    pub json_timestamps: bool,

    /// JSON progress verbosity.
    #[arg(long, value_enum, default_value_t = JsonProgressArg::Pages, requires = "json")]
    pub json_progress: JsonProgressArg,

    /// Check the image, loaders and port without touching the device.
    #[arg(long)]
    pub dry_run: bool,

    /// Reduce output (only errors).
    #[arg(long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// More logs to stderr.
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Parser)]
pub struct ListArgs {
    /// Emit JSON line output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ChipArgs {
    /// Chip-id word in hex, with or without 0x.
    pub word: String,

    /// Emit JSON output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct SendArgs {
    /// OSC address, e.g. /appled/0/state.
    pub address: String,

    /// Arguments; integers, floats (one '.') and strings are told apart automatically.
    #[arg(allow_negative_numbers = true)]
    pub args: Vec<String>,

    /// USB-CDC serial port of a running board.
    #[arg(long, conflicts_with = "udp", required_unless_present = "udp")]
    pub port: Option<String>,

    /// Board address for UDP.
    #[arg(long)]
    pub udp: Option<String>,

    /// Use the factory test fixture port (12000) for sending and listening.
    #[arg(long, requires = "udp", conflicts_with_all = ["udp_port", "listen_port"])]
    pub factory_test: bool,

    /// Board UDP port.
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    pub udp_port: u16,

    /// Local UDP port to listen for replies on.
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    pub listen_port: u16,

    /// How long to wait for replies after sending.
    #[arg(long, default_value_t = 500)]
    pub listen_ms: u64,

    /// Emit JSON line output.
    #[arg(long)]
    pub json: bool,

    /// More logs to stderr.
    #[arg(long, short)]
    pub verbose: bool,
}
