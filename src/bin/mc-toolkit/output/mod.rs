use crate::cli;

use mc_toolkit::chip::ChipInfo;
use mc_toolkit::osc::{Argument, Message};
use mc_toolkit::operation::OperationEvent;
use mc_toolkit::targets;
use mc_toolkit::upload::UploadSummary;

pub mod human;
pub mod json;


#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub verbose: bool,
    pub quiet: bool,
    pub json_timestamps: bool,
    pub json_progress: JsonProgressMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonProgressMode {
    Pages,
    None,
}

#[derive(Debug, Clone)]
pub struct DryRunSummary {
    pub image: String,
    pub bytes: usize,
    pub port: String,
    /// Page sizes we have a loader for, ascending.
    pub loader_page_sizes: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Sent => "sent",
            Direction::Received => "received",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Operation(OperationEvent),
    UploadSummary(UploadSummary),
    DryRun(DryRunSummary),
    ListTargets(Vec<targets::Target>),
    Chip(ChipInfo),
    Message {
        direction: Direction,
        device: String,
        message: Message,
    },
    Malformed {
        device: String,
        reason: String,
    },
    Error {
        code: i32,
        message: String,
    },
    HintAmbiguousTargets(Vec<targets::Target>),
}

pub trait Reporter {
    fn emit(&mut self, event: Event);
    fn finish(&mut self);
}

fn make(opts: OutputOptions, json: bool) -> Box<dyn Reporter> {
    if json {
        Box::new(json::JsonOutput::new(opts))
    } else {
        Box::new(human::HumanOutput::new(opts))
    }
}

fn plain_options(verbose: bool) -> OutputOptions {
    OutputOptions {
        verbose,
        quiet: false,
        json_timestamps: false,
        json_progress: JsonProgressMode::Pages,
    }
}

pub fn make_for_upload(args: &cli::UploadArgs) -> Box<dyn Reporter> {
    let json_progress = match args.json_progress {
        cli::JsonProgressArg::Pages => JsonProgressMode::Pages,
        cli::JsonProgressArg::None => JsonProgressMode::None,
    };
    let opts = OutputOptions {
        verbose: args.verbose,
        quiet: args.quiet,
        json_timestamps: args.json_timestamps,
        json_progress,
    };
    make(opts, args.json)
}

pub fn make_for_list(args: &cli::ListArgs) -> Box<dyn Reporter> {
    make(plain_options(false), args.json)
}

pub fn make_for_chip(args: &cli::ChipArgs) -> Box<dyn Reporter> {
    make(plain_options(false), args.json)
}

pub fn make_for_send(args: &cli::SendArgs) -> Box<dyn Reporter> {
    make(plain_options(args.verbose), args.json)
}

pub fn target_to_value(index: usize, t: &targets::Target) -> serde_json::Value {
    let mut v = serde_json::to_value(t)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    if let serde_json::Value::Object(obj) = &mut v {
        obj.insert("index".to_string(), serde_json::Value::from(index as u64));
        obj.insert("target_id".to_string(), serde_json::Value::from(t.id()));
    }
    v
}

pub fn format_target_line(index: usize, t: &targets::Target) -> String {
    format!(
        "[{index}] {:<5} {} {:04X}:{:04X} {}",
        t.kind.as_str(),
        t.id(),
        t.vid,
        t.pid,
        t.product.as_deref().unwrap_or("")
    )
    .trim_end()
    .to_string()
}

fn size_kib(size: Option<u32>) -> String {
    match size {
        Some(0) => "none".to_string(),
        Some(kib) => format!("{kib} KiB"),
        None => "reserved".to_string(),
    }
}

pub fn format_chip_lines(info: &ChipInfo) -> Vec<String> {
    vec![
        format!("chip id      0x{:08X} (version {})", info.chip_id, info.version),
        format!("architecture {}", info.arch),
        format!(
            "processor    {}",
            info.eproc_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("unknown ({})", info.eproc))
        ),
        format!(
            "flash        {} + {}",
            size_kib(info.nv_size_kib),
            size_kib(info.nv_size2_kib)
        ),
        format!("sram         {}", size_kib(info.sram_size_kib)),
        format!(
            "page size    {} bytes, {} lock regions",
            info.page_size, info.lock_bits
        ),
    ]
}

pub fn argument_to_value(arg: &Argument) -> serde_json::Value {
    match arg {
        Argument::Int(v) => serde_json::Value::from(*v),
        Argument::Float(v) => serde_json::Value::from(f64::from(*v)),
        Argument::String(v) => serde_json::Value::from(v.as_str()),
        Argument::Blob(v) => serde_json::Value::from(v.clone()),
    }
}
