use std::io::{IsTerminal, Write};

use mc_toolkit::operation::OperationEvent;
use mc_toolkit::targets::{self, BOARD_PID, BOARD_VID, SAMBA_PID, SAMBA_VID};
use mc_toolkit::upload::PagePlan;

use crate::output::{
    format_chip_lines, format_target_line, Direction, DryRunSummary, Event, OutputOptions,
    Reporter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Quiet,
    Verbose,
    Progress,
}

pub struct HumanOutput {
    opts: OutputOptions,
    is_tty: bool,
    progress_active: bool,
    last_percent: Option<u8>,
}

impl HumanOutput {
    pub fn new(opts: OutputOptions) -> Self {
        Self {
            opts,
            is_tty: std::io::stderr().is_terminal(),
            progress_active: false,
            last_percent: None,
        }
    }

    fn mode(&self) -> Mode {
        if self.opts.quiet {
            Mode::Quiet
        } else if self.opts.verbose {
            Mode::Verbose
        } else {
            Mode::Progress
        }
    }

    fn finish_line(&mut self) {
        if self.progress_active {
            eprintln!();
            self.progress_active = false;
        }
    }

    fn println(&mut self, msg: &str) {
        if self.mode() == Mode::Quiet {
            return;
        }
        self.finish_line();
        eprintln!("{msg}");
    }

    fn progress_update(&mut self, percent: u8, page: usize, pages: usize) {
        if self.mode() != Mode::Progress {
            return;
        }

        if self.is_tty {
            eprint!("\r  writing {percent:3}% ({page}/{pages})");
            let _ = std::io::stderr().flush();
            self.progress_active = true;
            self.last_percent = Some(percent);
            return;
        }

        let last = self.last_percent.unwrap_or(0);
        if percent == 100 || percent >= last.saturating_add(10) {
            self.last_percent = Some(percent);
            self.println(&format!("  writing {percent:3}% ({page}/{pages})"));
        }
    }

    pub(crate) fn ambiguous_help_lines(detected: &[targets::Target]) -> Vec<String> {
        detected
            .iter()
            .enumerate()
            .map(|(i, t)| format_target_line(i, t))
            .collect()
    }

    fn print_ambiguous_help(&mut self, detected: &[targets::Target]) {
        if self.mode() == Mode::Quiet || detected.is_empty() {
            return;
        }

        self.println("");
        self.println("Detected boot monitors:");
        for line in Self::ambiguous_help_lines(detected) {
            self.println(&line);
        }
        self.println("Hint: pick one with --port <name>");
    }

    fn on_operation(&mut self, ev: OperationEvent) {
        match ev {
            OperationEvent::ImageLoaded { path, bytes } => {
                self.println(&format!("Image: {path} ({bytes} bytes)"));
            }
            OperationEvent::Connected {
                device,
                chip,
                identified,
            } => {
                self.println(&format!(
                    "Connected to {device}: {} 0x{:08X}, {}-byte pages",
                    chip.arch, chip.chip_id, chip.page_size
                ));
                if self.mode() == Mode::Verbose {
                    if !identified {
                        self.println("  (monitor did not answer N#; continuing)");
                    }
                    for line in format_chip_lines(&chip) {
                        self.println(&format!("  {line}"));
                    }
                }
            }
            OperationEvent::LoaderStaged {
                device: _,
                page_size,
                bytes,
            } => {
                if self.mode() == Mode::Verbose {
                    self.println(&format!(
                        "Loader for {page_size}-byte pages staged ({bytes} bytes)"
                    ));
                }
            }
            OperationEvent::WriteStart {
                device: _,
                pages,
                page_size,
            } => {
                self.last_percent = None;
                self.println(&format!("Writing {pages} pages of {page_size} bytes"));
            }
            OperationEvent::Progress {
                device: _,
                page,
                pages,
                percent,
            } => {
                if self.mode() == Mode::Verbose {
                    self.println(&format!("  page {}/{pages} ({percent}%)", page + 1));
                } else {
                    self.progress_update(percent, page + 1, pages);
                }
            }
            OperationEvent::BootBitSet { .. } => self.println("Boot from flash: set"),
            OperationEvent::Reset { .. } => self.println("Reset"),
            OperationEvent::Done { device } => {
                self.println(&format!("Done: {device}"));
            }
        }
    }
}

impl Reporter for HumanOutput {
    fn emit(&mut self, event: Event) {
        match event {
            Event::Operation(ev) => self.on_operation(ev),
            Event::UploadSummary(summary) => {
                let reset = if summary.reset { "" } else { " (not reset)" };
                self.println(&format!(
                    "Uploaded {} bytes in {} pages to {}{reset}",
                    summary.bytes, summary.pages, summary.device
                ));
            }
            Event::DryRun(summary) => emit_dry_run(summary, self),
            Event::ListTargets(targets) => emit_list_targets(&targets, self),
            Event::Chip(info) => {
                for line in format_chip_lines(&info) {
                    self.println(&line);
                }
            }
            Event::Message {
                direction,
                device,
                message,
            } => {
                let arrow = match direction {
                    Direction::Sent => "->",
                    Direction::Received => "<-",
                };
                if direction == Direction::Received || self.mode() == Mode::Verbose {
                    self.finish_line();
                    println!("{arrow} {device} {message}");
                }
            }
            Event::Malformed { device, reason } => {
                self.println(&format!("warning: dropped malformed packet from {device}: {reason}"));
            }
            Event::Error { code: _, message } => {
                self.finish_line();
                eprintln!("error: {message}");
            }
            Event::HintAmbiguousTargets(detected) => self.print_ambiguous_help(&detected),
        }
    }

    fn finish(&mut self) {
        self.finish_line();
    }
}

fn emit_list_targets(targets: &[targets::Target], out: &mut HumanOutput) {
    if targets.is_empty() {
        out.println(&format!(
            "No targets found (SAM-BA {SAMBA_VID:04X}:{SAMBA_PID:04X} or board {BOARD_VID:04X}:{BOARD_PID:04X})"
        ));
        return;
    }

    for (i, t) in targets.iter().enumerate() {
        out.println(&format_target_line(i, t));
    }
}

fn emit_dry_run(summary: DryRunSummary, out: &mut HumanOutput) {
    out.println(&format!(
        "Dry run: {} ({} bytes) -> {}",
        summary.image, summary.bytes, summary.port
    ));
    for ps in summary.loader_page_sizes {
        let plan = PagePlan::new(summary.bytes, ps as usize);
        out.println(&format!("  {ps}-byte pages: {} pages", plan.pages()));
    }
}
