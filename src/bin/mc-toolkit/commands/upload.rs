use mc_toolkit::clock::SystemClock;
use mc_toolkit::loader::LoaderSet;
use mc_toolkit::targets::{self, SelectError, TargetKind};
use mc_toolkit::transport::{MonitorTransport, SerialConfig};
use mc_toolkit::upload::{self, UploadError, UploadErrorKind};

use crate::cli;
use crate::context;
use crate::exit_codes;
use crate::output::{DryRunSummary, Event, Reporter};

pub fn run(args: cli::UploadArgs, out: &mut dyn Reporter) -> i32 {
    let loaders = match context::loader_set(&args) {
        Ok(set) => set,
        Err(e) => return fail(out, exit_codes::EXIT_NO_LOADER, e.to_string()),
    };
    if loaders.is_empty() {
        return fail(
            out,
            exit_codes::EXIT_NO_LOADER,
            "no loader images; pass --loader-dir or --loader-128/--loader-256".to_string(),
        );
    }

    let port = match resolve_port(args.port.as_deref(), out) {
        Ok(port) => port,
        Err(code) => return code,
    };

    if args.dry_run {
        return dry_run(&args, port, &loaders, out);
    }

    let transport = MonitorTransport::new(SerialConfig::new(port));
    let handle = match upload::spawn_upload(
        transport,
        SystemClock,
        args.image.clone(),
        loaders,
        context::upload_options(&args),
    ) {
        Ok(h) => h,
        Err(e) => return fail(out, map_upload_error(&e), e.to_string()),
    };

    for ev in handle.events() {
        out.emit(Event::Operation(ev));
    }

    match handle.join() {
        Ok(summary) => {
            out.emit(Event::UploadSummary(summary));
            exit_codes::EXIT_OK
        }
        Err(e) => fail(out, map_upload_error(&e), e.to_string()),
    }
}

/// An explicit `--port` is used as-is: some hosts do not report USB ids for
/// the monitor. Otherwise exactly one boot monitor must be attached.
fn resolve_port(port: Option<&str>, out: &mut dyn Reporter) -> Result<String, i32> {
    if let Some(port) = port {
        return Ok(port.to_string());
    }

    let found = match targets::discover_targets() {
        Ok(found) => found,
        Err(e) => return Err(fail(out, exit_codes::EXIT_UNEXPECTED, e.to_string())),
    };

    let selected =
        targets::select_one(TargetKind::Samba, None, &found).map(|t| t.port_name.clone());
    match selected {
        Ok(port) => Ok(port),
        Err(e @ SelectError::Ambiguous { .. }) => {
            let code = fail(out, exit_codes::EXIT_AMBIGUOUS, e.to_string());
            let monitors = found
                .into_iter()
                .filter(|t| t.kind == TargetKind::Samba)
                .collect();
            out.emit(Event::HintAmbiguousTargets(monitors));
            Err(code)
        }
        Err(e) => Err(fail(out, exit_codes::EXIT_NO_DEVICE, e.to_string())),
    }
}

fn dry_run(
    args: &cli::UploadArgs,
    port: String,
    loaders: &LoaderSet,
    out: &mut dyn Reporter,
) -> i32 {
    let bytes = match std::fs::metadata(&args.image) {
        Ok(m) if m.len() > 0 => m.len() as usize,
        Ok(_) => {
            return fail(
                out,
                exit_codes::EXIT_INVALID_IMAGE,
                format!("image {} is empty", args.image.display()),
            )
        }
        Err(e) => {
            return fail(
                out,
                exit_codes::EXIT_INVALID_IMAGE,
                format!("unable to open image {}: {e}", args.image.display()),
            )
        }
    };

    out.emit(Event::DryRun(DryRunSummary {
        image: args.image.display().to_string(),
        bytes,
        port,
        loader_page_sizes: loaders.page_sizes().collect(),
    }));
    exit_codes::EXIT_OK
}

fn fail(out: &mut dyn Reporter, code: i32, message: String) -> i32 {
    out.emit(Event::Error { code, message });
    code
}

fn map_upload_error(e: &UploadError) -> i32 {
    match e.kind() {
        UploadErrorKind::NoDevice => exit_codes::EXIT_NO_DEVICE,
        UploadErrorKind::UnknownChip => exit_codes::EXIT_UNKNOWN_CHIP,
        UploadErrorKind::NoLoader => exit_codes::EXIT_NO_LOADER,
        UploadErrorKind::InvalidImage => exit_codes::EXIT_INVALID_IMAGE,
        UploadErrorKind::WriteFailed => exit_codes::EXIT_WRITE_FAILED,
        UploadErrorKind::Cancelled => exit_codes::EXIT_CANCELLED,
        UploadErrorKind::Unexpected => exit_codes::EXIT_UNEXPECTED,
    }
}
