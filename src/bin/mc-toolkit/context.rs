use std::time::Duration;

use mc_toolkit::loader::{LoaderError, LoaderSet};
use mc_toolkit::transport::{
    ByteTransport, SerialConfig, SlipSerialTransport, UdpConfig, UdpTransport,
};
use mc_toolkit::upload::UploadOptions;

use crate::cli;

/// Loader images from `--loader-dir`, then the per-size flags on top.
pub fn loader_set(args: &cli::UploadArgs) -> Result<LoaderSet, LoaderError> {
    let mut set = match &args.loader_dir {
        Some(dir) => LoaderSet::from_dir(dir)?,
        None => LoaderSet::new(),
    };
    if let Some(path) = &args.loader_128 {
        set.load_file(128, path)?;
    }
    if let Some(path) = &args.loader_256 {
        set.load_file(256, path)?;
    }
    Ok(set)
}

pub fn upload_options(args: &cli::UploadArgs) -> UploadOptions {
    let mut opts = UploadOptions {
        progress_every: args.progress_every.max(1),
        reset: !args.no_reset,
        ..Default::default()
    };
    opts.timing.reply_timeout = Duration::from_millis(args.reply_timeout_ms);
    opts
}

/// UDP when `--udp` is given, otherwise SLIP over the serial port.
pub fn control_transport(args: &cli::SendArgs) -> Option<Box<dyn ByteTransport>> {
    if let Some(config) = udp_config(args) {
        return Some(Box::new(UdpTransport::new(config)));
    }
    let port = args.port.as_ref()?;
    Some(Box::new(SlipSerialTransport::new(SerialConfig::new(
        port.clone(),
    ))))
}

fn udp_config(args: &cli::SendArgs) -> Option<UdpConfig> {
    let host = args.udp.clone()?;
    if args.factory_test {
        return Some(UdpConfig::factory_test(host));
    }
    let mut config = UdpConfig::new(host);
    config.send_port = args.udp_port;
    config.listen_port = args.listen_port;
    Some(config)
}
