use std::collections::BTreeMap;
use std::time::Instant;

use mc_toolkit::chip::ChipInfo;
use mc_toolkit::osc::Message;
use mc_toolkit::operation::OperationEvent;
use mc_toolkit::targets;
use mc_toolkit::upload::{PagePlan, UploadSummary};

use crate::output::{
    argument_to_value, target_to_value, Direction, DryRunSummary, Event, JsonProgressMode,
    OutputOptions, Reporter,
};

#[derive(serde::Serialize)]
pub struct JsonEvent {
    schema: u32,
    event: &'static str,
    #[serde(flatten)]
    fields: BTreeMap<&'static str, serde_json::Value>,
}

impl JsonEvent {
    pub fn status(event: &'static str) -> Self {
        Self {
            schema: 1,
            event,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_u64(mut self, k: &'static str, v: u64) -> Self {
        self.fields.insert(k, serde_json::Value::from(v));
        self
    }

    pub fn with_str(mut self, k: &'static str, v: &str) -> Self {
        self.fields.insert(k, serde_json::Value::from(v));
        self
    }

    pub fn with_bool(mut self, k: &'static str, v: bool) -> Self {
        self.fields.insert(k, serde_json::Value::from(v));
        self
    }

    pub fn with_value(mut self, k: &'static str, v: serde_json::Value) -> Self {
        self.fields.insert(k, v);
        self
    }
}

pub struct JsonOutput {
    opts: OutputOptions,
    start: Instant,
}

impl JsonOutput {
    pub fn new(opts: OutputOptions) -> Self {
        Self {
            opts,
            start: Instant::now(),
        }
    }
}

impl JsonOutput {
    pub(crate) fn render_event_json(&mut self, ev: JsonEvent) -> String {
        let mut ev = ev;
        if self.opts.json_timestamps {
            ev.fields.insert(
                "t_ms",
                serde_json::Value::from(self.start.elapsed().as_millis() as u64),
            );
        }
        serde_json::to_string(&ev).unwrap_or_else(|_| "{}".to_string())
    }

    fn json_event(&mut self, ev: JsonEvent) {
        println!("{}", self.render_event_json(ev));
    }

    fn error_event(&mut self, code: i32, msg: &str) {
        self.json_event(
            JsonEvent::status("error")
                .with_u64("code", code as u64)
                .with_str("message", msg),
        );

        if self.opts.verbose {
            eprintln!("error: {msg}");
        }
    }

    fn emit_operation(&mut self, ev: OperationEvent) {
        if matches!(ev, OperationEvent::Progress { .. })
            && self.opts.json_progress == JsonProgressMode::None
        {
            return;
        }
        self.json_event(operation_event_to_json(ev));
    }
}

impl Reporter for JsonOutput {
    fn emit(&mut self, event: Event) {
        match event {
            Event::Operation(ev) => self.emit_operation(ev),
            Event::UploadSummary(summary) => self.json_event(upload_summary_to_json(&summary)),
            Event::DryRun(summary) => self.json_event(dry_run_to_json(summary)),
            Event::ListTargets(targets) => self.json_event(list_to_json(&targets)),
            Event::Chip(info) => self.json_event(chip_to_json(&info)),
            Event::Message {
                direction,
                device,
                message,
            } => self.json_event(message_to_json(direction, &device, &message)),
            Event::Malformed { device, reason } => self.json_event(
                JsonEvent::status("malformed")
                    .with_str("device", &device)
                    .with_str("reason", &reason),
            ),
            Event::Error { code, message } => self.error_event(code, &message),
            Event::HintAmbiguousTargets(_) => {}
        }
    }

    fn finish(&mut self) {}
}

pub fn list_to_json(targets: &[targets::Target]) -> JsonEvent {
    JsonEvent::status("list")
        .with_u64("count", targets.len() as u64)
        .with_value(
            "targets",
            serde_json::Value::Array(
                targets
                    .iter()
                    .enumerate()
                    .map(|(i, t)| target_to_value(i, t))
                    .collect(),
            ),
        )
}

pub fn chip_to_json(info: &ChipInfo) -> JsonEvent {
    let kib = |v: Option<u32>| serde_json::to_value(v).unwrap_or(serde_json::Value::Null);
    JsonEvent::status("chip")
        .with_u64("chip_id", u64::from(info.chip_id))
        .with_str("chip_id_hex", &format!("0x{:08X}", info.chip_id))
        .with_u64("version", u64::from(info.version))
        .with_u64("eproc", u64::from(info.eproc))
        .with_value(
            "eproc_name",
            serde_json::to_value(info.eproc_name()).unwrap_or(serde_json::Value::Null),
        )
        .with_u64("arch", u64::from(info.arch.code()))
        .with_str("arch_name", info.arch.name())
        .with_value("nv_size_kib", kib(info.nv_size_kib))
        .with_value("nv_size2_kib", kib(info.nv_size2_kib))
        .with_value("nv_total_kib", kib(info.total_nv_kib()))
        .with_value("sram_size_kib", kib(info.sram_size_kib))
        .with_u64("page_size", u64::from(info.page_size))
        .with_u64("lock_bits", u64::from(info.lock_bits))
}

pub fn message_to_json(direction: Direction, device: &str, msg: &Message) -> JsonEvent {
    JsonEvent::status("message")
        .with_str("direction", direction.as_str())
        .with_str("device", device)
        .with_str("address", &msg.address)
        .with_str("type_tag", &msg.type_tag())
        .with_value(
            "args",
            serde_json::Value::Array(msg.args.iter().map(argument_to_value).collect()),
        )
}

pub fn dry_run_to_json(summary: DryRunSummary) -> JsonEvent {
    let plans: Vec<serde_json::Value> = summary
        .loader_page_sizes
        .iter()
        .map(|&ps| {
            serde_json::json!({
                "page_size": ps,
                "pages": PagePlan::new(summary.bytes, ps as usize).pages(),
            })
        })
        .collect();

    JsonEvent::status("dry_run")
        .with_str("image", &summary.image)
        .with_u64("bytes", summary.bytes as u64)
        .with_str("port", &summary.port)
        .with_value("plans", serde_json::Value::Array(plans))
}

pub fn upload_summary_to_json(summary: &UploadSummary) -> JsonEvent {
    JsonEvent::status("summary")
        .with_str("device", &summary.device)
        .with_str("chip_id_hex", &format!("0x{:08X}", summary.chip.chip_id))
        .with_str("arch_name", summary.chip.arch.name())
        .with_u64("page_size", u64::from(summary.chip.page_size))
        .with_u64("pages", summary.pages as u64)
        .with_u64("bytes", summary.bytes as u64)
        .with_bool("reset", summary.reset)
}

pub fn operation_event_to_json(ev: OperationEvent) -> JsonEvent {
    match ev {
        OperationEvent::ImageLoaded { path, bytes } => JsonEvent::status("image_loaded")
            .with_str("path", &path)
            .with_u64("bytes", bytes as u64),
        OperationEvent::Connected {
            device,
            chip,
            identified,
        } => JsonEvent::status("connected")
            .with_str("device", &device)
            .with_str("chip_id_hex", &format!("0x{:08X}", chip.chip_id))
            .with_str("arch_name", chip.arch.name())
            .with_u64("page_size", u64::from(chip.page_size))
            .with_bool("identified", identified),
        OperationEvent::LoaderStaged {
            device,
            page_size,
            bytes,
        } => JsonEvent::status("loader_staged")
            .with_str("device", &device)
            .with_u64("page_size", u64::from(page_size))
            .with_u64("bytes", bytes as u64),
        OperationEvent::WriteStart {
            device,
            pages,
            page_size,
        } => JsonEvent::status("write_start")
            .with_str("device", &device)
            .with_u64("pages", pages as u64)
            .with_u64("page_size", u64::from(page_size)),
        OperationEvent::Progress {
            device,
            page,
            pages,
            percent,
        } => JsonEvent::status("progress")
            .with_str("device", &device)
            .with_u64("page", page as u64)
            .with_u64("pages", pages as u64)
            .with_u64("percent", u64::from(percent)),
        OperationEvent::BootBitSet { device } => {
            JsonEvent::status("boot_bit_set").with_str("device", &device)
        }
        OperationEvent::Reset { device } => JsonEvent::status("reset").with_str("device", &device),
        OperationEvent::Done { device } => JsonEvent::status("done").with_str("device", &device),
    }
}
