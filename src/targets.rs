use serde::Serialize;
use thiserror::Error;

/// SAM-BA boot agent (board held in monitor mode).
pub const SAMBA_VID: u16 = 0x03EB;
pub const SAMBA_PID: u16 = 0x6124;

/// Make Controller firmware running, enumerated as USB-CDC.
pub const BOARD_VID: u16 = 0xEB03;
pub const BOARD_PID: u16 = 0x0920;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Boot monitor; accepts uploads.
    Samba,
    /// Running board; accepts control messages.
    Board,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Samba => "samba",
            TargetKind::Board => "board",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub kind: TargetKind,
    pub port_name: String,
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl Target {
    pub fn id(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.port_name)
    }
}

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("serial discovery failed: {0}")]
    Serial(#[from] serialport::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectError {
    #[error("no {kind} device found")]
    NoTargets { kind: TargetKind },

    #[error("no {kind} device on port {port}")]
    PortNotFound { kind: TargetKind, port: String },

    #[error("multiple {kind} devices detected ({count}); use --port")]
    Ambiguous { kind: TargetKind, count: usize },
}

pub fn classify(vid: u16, pid: u16) -> Option<TargetKind> {
    match (vid, pid) {
        (SAMBA_VID, SAMBA_PID) => Some(TargetKind::Samba),
        (BOARD_VID, BOARD_PID) => Some(TargetKind::Board),
        _ => None,
    }
}

/// Keep the USB ports we recognize, boot monitors first, then by port name.
pub fn targets_from_ports(ports: Vec<serialport::SerialPortInfo>) -> Vec<Target> {
    let mut out: Vec<Target> = ports
        .into_iter()
        .filter_map(|p| {
            let serialport::SerialPortType::UsbPort(usb) = p.port_type else {
                return None;
            };
            let kind = classify(usb.vid, usb.pid)?;
            Some(Target {
                kind,
                port_name: p.port_name,
                vid: usb.vid,
                pid: usb.pid,
                serial_number: usb.serial_number,
                manufacturer: usb.manufacturer,
                product: usb.product,
            })
        })
        .collect();

    out.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.port_name.cmp(&b.port_name)));
    out
}

pub fn discover_targets() -> Result<Vec<Target>, DiscoverError> {
    let targets = targets_from_ports(serialport::available_ports()?);
    tracing::debug!(count = targets.len(), "discovered targets");
    Ok(targets)
}

/// Pick exactly one target of `kind`, by port name when one is given.
pub fn select_one<'a>(
    kind: TargetKind,
    port: Option<&str>,
    targets: &'a [Target],
) -> Result<&'a Target, SelectError> {
    let mut matching = targets.iter().filter(|t| t.kind == kind);

    if let Some(port) = port {
        return matching
            .find(|t| t.port_name == port)
            .ok_or_else(|| SelectError::PortNotFound {
                kind,
                port: port.to_string(),
            });
    }

    let candidates: Vec<&Target> = matching.collect();
    match candidates.as_slice() {
        [] => Err(SelectError::NoTargets { kind }),
        [one] => Ok(*one),
        many => Err(SelectError::Ambiguous {
            kind,
            count: many.len(),
        }),
    }
}
