//! Flash upload through the SAM-BA boot monitor.
//!
//! `Disconnected -> Connected -> LoaderStaged -> Writing(page i of N) ->
//! BootBitSet -> Reset -> Disconnected`. Every step is sequential and a
//! failure anywhere aborts the upload; flash is then in an unknown state and
//! the only recovery is starting over from connect.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::chip::{self, ChipGeometryError, ChipInfo, CHIP_ID_ADDR};
use crate::clock::{CancelToken, Clock};
use crate::loader::LoaderSet;
use crate::operation::OperationEvent;
use crate::samba::{self, SambaError, SambaMonitor, SambaTiming};
use crate::transport::{ByteTransport, TransportError};

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub timing: SambaTiming,

    /// How many times to read the flash controller status before giving up.
    pub ready_poll_limit: u32,
    pub ready_poll_interval: Duration,

    /// Emit a progress event every this many pages (the last page always reports).
    pub progress_every: usize,

    /// Reset the processor once the boot bit is set.
    pub reset: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            timing: SambaTiming::default(),
            ready_poll_limit: 1000,
            ready_poll_interval: Duration::from_millis(1),
            progress_every: 5,
            reset: true,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadState {
    Disconnected,
    Connected,
    LoaderStaged,
    Writing { page: usize, pages: usize },
    BootBitSet,
    Reset,
}

/// Page arithmetic for an image of `image_len` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    pub image_len: usize,
    pub page_size: usize,
}

impl PagePlan {
    pub fn new(image_len: usize, page_size: usize) -> Self {
        Self {
            image_len,
            page_size,
        }
    }

    pub fn pages(&self) -> usize {
        self.image_len.div_ceil(self.page_size)
    }

    /// Bytes of image data in `page`; only the last page can be short.
    pub fn page_len(&self, page: usize) -> usize {
        let start = page * self.page_size;
        self.image_len.saturating_sub(start).min(self.page_size)
    }
}

/// Per-connection bookkeeping. Lives from connect to disconnect and is never
/// reused: a failed upload starts again with a fresh one.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub device_key: String,
    pub image_path: PathBuf,
    pub image_len: usize,
    /// Image bytes already written.
    pub cursor: usize,
    pub page_size: u32,
    pub progress: u8,
    /// Whether the monitor answered `N#`.
    pub identified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub device: String,
    pub chip: ChipInfo,
    pub pages: usize,
    pub bytes: usize,
    pub reset: bool,
}

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Monitor(#[from] SambaError),

    #[error("{0}")]
    Geometry(#[from] ChipGeometryError),
}

#[derive(Error, Debug)]
pub enum PageWriteError {
    #[error("{0}")]
    Monitor(#[from] SambaError),

    #[error("read image: {0}")]
    Image(#[source] io::Error),
}

#[derive(Error, Debug)]
pub enum BootBitError {
    #[error("{0}")]
    Monitor(#[from] SambaError),

    #[error("flash controller not ready after {polls} polls")]
    NotReady { polls: u32 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UploadErrorKind {
    NoDevice,
    UnknownChip,
    NoLoader,
    InvalidImage,
    WriteFailed,
    Cancelled,
    Unexpected,
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("unable to open image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("image {path} is empty")]
    EmptyImage { path: PathBuf },

    #[error("can't connect to {device}: {source}")]
    CantConnect {
        device: String,
        #[source]
        source: ConnectError,
    },

    #[error("no flash loader for {page_size}-byte pages")]
    NoLoader { page_size: u32 },

    #[error("loader upload failed: {source}")]
    LoaderUpload {
        page_size: u32,
        #[source]
        source: SambaError,
    },

    #[error("write failed at page {page}: {source}")]
    FlashWrite {
        page: usize,
        #[source]
        source: PageWriteError,
    },

    #[error("setting boot-from-flash failed: {source}")]
    BootBitCommit {
        #[source]
        source: BootBitError,
    },

    #[error("reset failed: {source}")]
    Reset {
        #[source]
        source: SambaError,
    },

    #[error("cancelled before page {page}")]
    Cancelled { page: usize },

    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: UploadState,
    },

    #[error("unable to start upload worker: {0}")]
    Worker(#[source] io::Error),

    #[error("upload worker panicked")]
    WorkerPanicked,
}

impl UploadError {
    pub fn kind(&self) -> UploadErrorKind {
        match self {
            UploadError::Image { .. } | UploadError::EmptyImage { .. } => {
                UploadErrorKind::InvalidImage
            }
            UploadError::CantConnect {
                source: ConnectError::Geometry(_),
                ..
            } => UploadErrorKind::UnknownChip,
            UploadError::CantConnect { .. } => UploadErrorKind::NoDevice,
            UploadError::NoLoader { .. } => UploadErrorKind::NoLoader,
            UploadError::LoaderUpload { .. }
            | UploadError::FlashWrite { .. }
            | UploadError::BootBitCommit { .. }
            | UploadError::Reset { .. } => UploadErrorKind::WriteFailed,
            UploadError::Cancelled { .. } => UploadErrorKind::Cancelled,
            UploadError::InvalidState { .. }
            | UploadError::Worker(_)
            | UploadError::WorkerPanicked => UploadErrorKind::Unexpected,
        }
    }
}

pub struct FlashEngine<T, C> {
    monitor: SambaMonitor<T, C>,
    options: UploadOptions,
    state: UploadState,
    chip: Option<ChipInfo>,
    session: Option<UploadSession>,
}

impl<T: ByteTransport, C: Clock> FlashEngine<T, C> {
    pub fn new(transport: T, clock: C, options: UploadOptions) -> Self {
        let monitor = SambaMonitor::new(transport, clock, options.timing.clone());
        Self {
            monitor,
            options,
            state: UploadState::Disconnected,
            chip: None,
            session: None,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn chip(&self) -> Option<&ChipInfo> {
        self.chip.as_ref()
    }

    pub fn session(&self) -> Option<&UploadSession> {
        self.session.as_ref()
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    fn require(&self, operation: &'static str, ok: bool) -> Result<(), UploadError> {
        if ok {
            Ok(())
        } else {
            Err(UploadError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn session_ref(&self, operation: &'static str) -> Result<&UploadSession, UploadError> {
        self.session.as_ref().ok_or(UploadError::InvalidState {
            operation,
            state: self.state,
        })
    }

    /// Open the transport, wake the monitor and identify the chip.
    pub fn connect(&mut self, image_path: &Path, image_len: usize) -> Result<ChipInfo, UploadError> {
        self.require("connect", self.state == UploadState::Disconnected)?;

        let device = self.monitor.transport_mut().describe();
        let cant = |source: ConnectError| UploadError::CantConnect {
            device: device.clone(),
            source,
        };

        self.monitor
            .transport_mut()
            .open()
            .map_err(|e| cant(e.into()))?;
        let identified = self.monitor.identify().map_err(|e| cant(e.into()))?;
        let word = self
            .monitor
            .read_word(CHIP_ID_ADDR)
            .map_err(|e| cant(e.into()))?;
        let info = chip::chip_info(word).map_err(|e| cant(e.into()))?;

        tracing::info!(
            %device,
            chip_id = word,
            arch = %info.arch,
            page_size = info.page_size,
            identified,
            "connected"
        );

        self.session = Some(UploadSession {
            device_key: device,
            image_path: image_path.to_path_buf(),
            image_len,
            cursor: 0,
            page_size: info.page_size,
            progress: 0,
            identified,
        });
        self.chip = Some(info.clone());
        self.state = UploadState::Connected;
        Ok(info)
    }

    /// Send the loader matching the chip's page size; returns its length.
    pub fn stage_loader(&mut self, loaders: &LoaderSet) -> Result<usize, UploadError> {
        self.require("stage loader", self.state == UploadState::Connected)?;
        let page_size = self.session_ref("stage loader")?.page_size;

        let image = loaders
            .for_page_size(page_size)
            .ok_or(UploadError::NoLoader { page_size })?;
        self.monitor
            .send_file(samba::LOADER_ADDR, image)
            .map_err(|source| UploadError::LoaderUpload { page_size, source })?;

        tracing::info!(page_size, bytes = image.len(), "loader staged");
        self.state = UploadState::LoaderStaged;
        Ok(image.len())
    }

    /// Write the whole image page by page.
    ///
    /// Cancellation is only honoured between pages; a page's index write,
    /// data transfer and go command always run together.
    pub fn write_image<R, F>(
        &mut self,
        reader: &mut R,
        cancel: &CancelToken,
        on_event: &mut F,
    ) -> Result<(), UploadError>
    where
        R: Read,
        F: FnMut(OperationEvent),
    {
        self.require("write image", self.state == UploadState::LoaderStaged)?;
        let session = self.session_ref("write image")?;
        let device = session.device_key.clone();
        let page_size = session.page_size;
        let image_len = session.image_len;
        if image_len == 0 {
            return Err(UploadError::EmptyImage {
                path: session.image_path.clone(),
            });
        }

        let plan = PagePlan::new(image_len, page_size as usize);
        let pages = plan.pages();
        let every = self.options.progress_every.max(1);
        on_event(OperationEvent::WriteStart {
            device: device.clone(),
            pages,
            page_size,
        });

        let mut buf = vec![0xFFu8; page_size as usize];
        for page in 0..pages {
            if cancel.is_cancelled() {
                tracing::info!(page, pages, "upload cancelled");
                return Err(UploadError::Cancelled { page });
            }

            self.state = UploadState::Writing { page, pages };
            let len = plan.page_len(page);
            // A short last page goes out padded to a full page of erased flash.
            buf.fill(0xFF);
            self.program_page(page, &mut buf, len, reader)
                .map_err(|source| UploadError::FlashWrite { page, source })?;

            let percent = ((page + 1) * 100 / pages) as u8;
            if let Some(s) = self.session.as_mut() {
                s.cursor += len;
                s.progress = percent;
            }
            tracing::debug!(page, pages, bytes = len, "page written");

            if (page + 1) % every == 0 || page + 1 == pages {
                on_event(OperationEvent::Progress {
                    device: device.clone(),
                    page,
                    pages,
                    percent,
                });
            }
        }
        Ok(())
    }

    fn program_page<R: Read>(
        &mut self,
        page: usize,
        buf: &mut [u8],
        len: usize,
        reader: &mut R,
    ) -> Result<(), PageWriteError> {
        let page_size = buf.len() as u32;
        self.monitor
            .write_word(samba::page_index_addr(page_size), page as u32)?;
        reader
            .read_exact(&mut buf[..len])
            .map_err(PageWriteError::Image)?;
        self.monitor.send_file(samba::PAGE_BUFFER_ADDR, buf)?;
        self.monitor.go(samba::LOADER_ADDR)?;
        Ok(())
    }

    fn wait_ready(&mut self) -> Result<(), BootBitError> {
        let limit = self.options.ready_poll_limit;
        let interval = self.options.ready_poll_interval;
        for _ in 0..limit {
            let status = self.monitor.read_word(samba::EFC_STATUS_ADDR)?;
            if status & samba::EFC_READY != 0 {
                return Ok(());
            }
            self.monitor.clock_mut().sleep(interval);
        }
        Err(BootBitError::NotReady { polls: limit })
    }

    /// Set GPNVM bit 2 so the chip boots from flash instead of the monitor.
    pub fn commit_boot_source(&mut self) -> Result<(), UploadError> {
        let written = matches!(self.state, UploadState::Writing { .. })
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.cursor == s.image_len);
        self.require("set boot bit", written)?;

        let commit = |engine: &mut Self| -> Result<(), BootBitError> {
            engine.wait_ready()?;
            engine
                .monitor
                .write_word(samba::EFC_COMMAND_ADDR, samba::EFC_SET_BOOT_FROM_FLASH)?;
            engine.wait_ready()
        };
        commit(self).map_err(|source| UploadError::BootBitCommit { source })?;

        tracing::info!("boot from flash set");
        self.state = UploadState::BootBitSet;
        Ok(())
    }

    /// Issue the processor reset. Whether the new firmware comes up is for
    /// the caller to find out.
    pub fn reset(&mut self) -> Result<(), UploadError> {
        self.require("reset", self.state == UploadState::BootBitSet)?;
        self.monitor
            .write_word(samba::RSTC_CR_ADDR, samba::RSTC_RESET_ALL)
            .map_err(|source| UploadError::Reset { source })?;
        tracing::info!("reset issued");
        self.state = UploadState::Reset;
        Ok(())
    }

    /// Close the transport and drop the session, whatever state we are in.
    pub fn disconnect(&mut self) -> Option<UploadSession> {
        if let Err(e) = self.monitor.transport_mut().close() {
            tracing::warn!("close failed: {e}");
        }
        self.state = UploadState::Disconnected;
        self.chip = None;
        self.session.take()
    }
}

/// Run a complete upload of the raw binary at `image_path`.
pub fn upload_image<T, C, F>(
    transport: T,
    clock: C,
    image_path: &Path,
    loaders: &LoaderSet,
    options: &UploadOptions,
    cancel: &CancelToken,
    mut on_event: F,
) -> Result<UploadSummary, UploadError>
where
    T: ByteTransport,
    C: Clock,
    F: FnMut(OperationEvent),
{
    let open_err = |source| UploadError::Image {
        path: image_path.to_path_buf(),
        source,
    };
    let mut file = File::open(image_path).map_err(open_err)?;
    let image_len = file.metadata().map_err(open_err)?.len() as usize;
    if image_len == 0 {
        return Err(UploadError::EmptyImage {
            path: image_path.to_path_buf(),
        });
    }
    on_event(OperationEvent::ImageLoaded {
        path: image_path.display().to_string(),
        bytes: image_len,
    });

    let mut engine = FlashEngine::new(transport, clock, options.clone());
    let result = run_upload(
        &mut engine,
        &mut file,
        image_path,
        image_len,
        loaders,
        cancel,
        &mut on_event,
    );
    engine.disconnect();
    result
}

fn run_upload<T, C, R, F>(
    engine: &mut FlashEngine<T, C>,
    reader: &mut R,
    image_path: &Path,
    image_len: usize,
    loaders: &LoaderSet,
    cancel: &CancelToken,
    on_event: &mut F,
) -> Result<UploadSummary, UploadError>
where
    T: ByteTransport,
    C: Clock,
    R: Read,
    F: FnMut(OperationEvent),
{
    let chip = engine.connect(image_path, image_len)?;
    let (device, identified) = match engine.session() {
        Some(s) => (s.device_key.clone(), s.identified),
        None => (String::new(), false),
    };
    on_event(OperationEvent::Connected {
        device: device.clone(),
        chip: chip.clone(),
        identified,
    });

    let bytes = engine.stage_loader(loaders)?;
    on_event(OperationEvent::LoaderStaged {
        device: device.clone(),
        page_size: chip.page_size,
        bytes,
    });

    engine.write_image(reader, cancel, on_event)?;

    engine.commit_boot_source()?;
    on_event(OperationEvent::BootBitSet {
        device: device.clone(),
    });

    let reset = engine.options().reset;
    if reset {
        engine.reset()?;
        on_event(OperationEvent::Reset {
            device: device.clone(),
        });
    }

    on_event(OperationEvent::Done {
        device: device.clone(),
    });

    Ok(UploadSummary {
        device,
        pages: PagePlan::new(image_len, chip.page_size as usize).pages(),
        bytes: image_len,
        reset,
        chip,
    })
}

/// An upload running on its own thread.
pub struct UploadHandle {
    events: mpsc::Receiver<OperationEvent>,
    cancel: CancelToken,
    join: JoinHandle<Result<UploadSummary, UploadError>>,
}

impl UploadHandle {
    /// Events in order; the iterator ends when the worker finishes.
    pub fn events(&self) -> &mpsc::Receiver<OperationEvent> {
        &self.events
    }

    /// Stop before the next page.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn join(self) -> Result<UploadSummary, UploadError> {
        self.join
            .join()
            .unwrap_or_else(|_| Err(UploadError::WorkerPanicked))
    }
}

/// Run [`upload_image`] on a worker thread so the page loop's fixed delays
/// never block the caller.
pub fn spawn_upload<T, C>(
    transport: T,
    clock: C,
    image_path: PathBuf,
    loaders: LoaderSet,
    options: UploadOptions,
) -> Result<UploadHandle, UploadError>
where
    T: ByteTransport + Send + 'static,
    C: Clock + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();

    let join = thread::Builder::new()
        .name("mc-upload".to_string())
        .spawn(move || {
            upload_image(
                transport,
                clock,
                &image_path,
                &loaders,
                &options,
                &worker_cancel,
                |ev| {
                    // Receiver gone means nobody is listening; keep flashing.
                    let _ = tx.send(ev);
                },
            )
        })
        .map_err(UploadError::Worker)?;

    Ok(UploadHandle {
        events: rx,
        cancel,
        join,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::mock::MockTransport;

    const SAM7X256: u32 = 0x275B_0940;
    const SAM7S64: u32 = 0x2709_0540;

    fn board(chip_id: u32, efc_status: u32) -> MockTransport {
        MockTransport::new().with_responder(move |cmd| {
            if cmd == b"wFFFFF240,4#" {
                Some(chip_id.to_le_bytes().to_vec())
            } else if cmd == b"wFFFFFF68,4#" {
                Some(efc_status.to_le_bytes().to_vec())
            } else {
                None
            }
        })
    }

    fn loaders() -> LoaderSet {
        LoaderSet::new()
            .with_image(256, vec![0xAB; 96])
            .with_image(128, vec![0xCD; 80])
    }

    fn image(len: usize) -> (tempfile::NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&data).unwrap();
        f.flush().unwrap();
        (f, data)
    }

    fn opts() -> UploadOptions {
        UploadOptions {
            ready_poll_limit: 3,
            ..Default::default()
        }
    }

    fn count(t: &MockTransport, cmd: &str) -> usize {
        t.commands().iter().filter(|c| *c == cmd).count()
    }

    #[test]
    fn page_plan_counts_pages_and_short_last_page() {
        let p = PagePlan::new(600, 256);
        assert_eq!(p.pages(), 3);
        assert_eq!(p.page_len(0), 256);
        assert_eq!(p.page_len(2), 88);

        let p = PagePlan::new(512, 256);
        assert_eq!(p.pages(), 2);
        assert_eq!(p.page_len(1), 256);

        let p = PagePlan::new(1, 128);
        assert_eq!((p.pages(), p.page_len(0)), (1, 1));
    }

    #[test]
    fn full_upload_issues_the_monitor_sequence() {
        let (f, data) = image(600);
        let mut t = board(SAM7X256, 1);
        let mut events = Vec::new();

        let summary = upload_image(
            &mut t,
            ManualClock::new(),
            f.path(),
            &loaders(),
            &opts(),
            &CancelToken::new(),
            |e| events.push(e),
        )
        .unwrap();

        assert_eq!(summary.pages, 3);
        assert_eq!(summary.bytes, 600);
        assert_eq!(summary.chip.page_size, 256);

        let mut expected = vec![
            "N#".to_string(),
            "wFFFFF240,4#".to_string(),
            "S201600,60#".to_string(),
        ];
        for page in 0..3 {
            expected.push(format!("W00201500,{page:08X}#"));
            expected.push("S201400,100#".to_string());
            expected.push("G00201600#".to_string());
        }
        expected.extend(
            [
                "wFFFFFF68,4#",
                "WFFFFFF64,5A00020B#",
                "wFFFFFF68,4#",
                "WFFFFFD00,A500000D#",
            ]
            .map(String::from),
        );
        assert_eq!(t.commands(), expected);

        // The last page carries 88 image bytes, then erased-flash padding.
        let last_s = t
            .sent
            .iter()
            .rposition(|s| s == b"S201400,100#")
            .unwrap();
        let page: Vec<u8> = t.sent[last_s + 1..last_s + 5].concat();
        assert_eq!(page.len(), 256);
        assert_eq!(&page[..88], &data[512..]);
        assert!(page[88..].iter().all(|&b| b == 0xFF));

        let progress: Vec<(usize, u8)> = events
            .iter()
            .filter_map(|e| match e {
                OperationEvent::Progress { page, percent, .. } => Some((*page, *percent)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(2, 100)]);
        assert!(matches!(events.last(), Some(OperationEvent::Done { .. })));
        assert!(!t.open);
    }

    #[test]
    fn page_five_timeout_aborts_without_further_pages() {
        let (f, _) = image(10 * 256);
        let mut t = board(SAM7X256, 1).fail_when(|cmd| cmd == b"W00201500,00000005#");

        let err = upload_image(
            &mut t,
            ManualClock::new(),
            f.path(),
            &loaders(),
            &opts(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();

        match &err {
            UploadError::FlashWrite { page, source } => {
                assert_eq!(*page, 5);
                assert!(matches!(
                    source,
                    PageWriteError::Monitor(SambaError::Transport {
                        source: TransportError::Timeout,
                        ..
                    })
                ));
            }
            other => panic!("expected FlashWrite, got {other:?}"),
        }
        assert_eq!(err.kind(), UploadErrorKind::WriteFailed);
        assert!(err.to_string().contains("page 5"));

        assert_eq!(count(&t, "G00201600#"), 5);
        assert_eq!(t.commands().last().map(String::as_str), Some("G00201600#"));
        assert_eq!(count(&t, "wFFFFFF68,4#"), 0);
        assert!(!t.open);
    }

    #[test]
    fn boot_bit_wait_is_bounded() {
        let (f, _) = image(256);
        let mut t = board(SAM7X256, 0);

        let err = upload_image(
            &mut t,
            ManualClock::new(),
            f.path(),
            &loaders(),
            &opts(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();

        assert!(matches!(
            err,
            UploadError::BootBitCommit {
                source: BootBitError::NotReady { polls: 3 }
            }
        ));
        assert_eq!(count(&t, "wFFFFFF68,4#"), 3);
        assert_eq!(count(&t, "WFFFFFF64,5A00020B#"), 0);
    }

    #[test]
    fn cancel_takes_effect_between_pages() {
        let (f, _) = image(10 * 256);
        let mut t = board(SAM7X256, 1);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();

        let err = upload_image(
            &mut t,
            ManualClock::new(),
            f.path(),
            &loaders(),
            &opts(),
            &cancel,
            move |e| {
                if let OperationEvent::Progress { page: 4, .. } = e {
                    trigger.cancel();
                }
            },
        )
        .unwrap_err();

        assert!(matches!(err, UploadError::Cancelled { page: 5 }));
        assert_eq!(err.kind(), UploadErrorKind::Cancelled);
        assert_eq!(count(&t, "G00201600#"), 5);
    }

    #[test]
    fn missing_loader_for_page_size_fails_before_writing() {
        let (f, _) = image(256);
        let mut t = board(SAM7X256, 1);
        let only_128 = LoaderSet::new().with_image(128, vec![1, 2, 3, 4]);

        let err = upload_image(
            &mut t,
            ManualClock::new(),
            f.path(),
            &only_128,
            &opts(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();

        assert!(matches!(err, UploadError::NoLoader { page_size: 256 }));
        assert!(t.commands().iter().all(|c| !c.starts_with('S')));
    }

    #[test]
    fn unknown_chip_cannot_connect() {
        let (f, _) = image(256);
        // SAM9 with 256 KiB: decodes fine, but no page geometry.
        let mut t = board(0x0199_0940, 1);

        let err = upload_image(
            &mut t,
            ManualClock::new(),
            f.path(),
            &loaders(),
            &opts(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();

        assert!(matches!(
            err,
            UploadError::CantConnect {
                source: ConnectError::Geometry(_),
                ..
            }
        ));
        assert_eq!(err.kind(), UploadErrorKind::UnknownChip);
    }

    #[test]
    fn silent_chip_id_read_is_a_connect_failure() {
        let (f, _) = image(256);
        let mut t = MockTransport::new();

        let err = upload_image(
            &mut t,
            ManualClock::new(),
            f.path(),
            &loaders(),
            &opts(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();

        assert!(matches!(
            err,
            UploadError::CantConnect {
                source: ConnectError::Monitor(SambaError::Timeout { .. }),
                ..
            }
        ));
        assert_eq!(err.kind(), UploadErrorKind::NoDevice);
    }

    #[test]
    fn empty_image_is_rejected_up_front() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let mut t = board(SAM7X256, 1);

        let err = upload_image(
            &mut t,
            ManualClock::new(),
            f.path(),
            &loaders(),
            &opts(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();

        assert!(matches!(err, UploadError::EmptyImage { .. }));
        assert!(t.sent.is_empty());
    }

    #[test]
    fn steps_out_of_order_are_refused() {
        let mut engine = FlashEngine::new(MockTransport::new(), ManualClock::new(), opts());
        let err = engine.stage_loader(&loaders()).unwrap_err();
        assert!(matches!(
            err,
            UploadError::InvalidState {
                state: UploadState::Disconnected,
                ..
            }
        ));
        assert!(engine.commit_boot_source().is_err());
        assert!(engine.reset().is_err());
    }

    #[test]
    fn engine_tracks_session_through_the_write_loop() {
        let (f, _) = image(300);
        let mut engine = FlashEngine::new(board(SAM7S64, 1), ManualClock::new(), opts());

        let chip = engine.connect(f.path(), 300).unwrap();
        assert_eq!(chip.page_size, 128);
        assert_eq!(engine.state(), UploadState::Connected);

        engine.stage_loader(&loaders()).unwrap();
        let mut reader = File::open(f.path()).unwrap();
        engine
            .write_image(&mut reader, &CancelToken::new(), &mut |_| {})
            .unwrap();
        assert_eq!(engine.state(), UploadState::Writing { page: 2, pages: 3 });
        let s = engine.session().unwrap();
        assert_eq!((s.cursor, s.progress), (300, 100));

        engine.commit_boot_source().unwrap();
        engine.reset().unwrap();
        assert_eq!(engine.state(), UploadState::Reset);

        let session = engine.disconnect().unwrap();
        assert_eq!(session.page_size, 128);
        assert_eq!(engine.state(), UploadState::Disconnected);
        assert!(engine.session().is_none());
    }

    #[test]
    fn spawned_upload_streams_events_and_joins() {
        let (f, _) = image(300);
        let handle = spawn_upload(
            board(SAM7S64, 1),
            ManualClock::new(),
            f.path().to_path_buf(),
            loaders(),
            opts(),
        )
        .unwrap();

        let events: Vec<OperationEvent> = handle.events().iter().collect();
        let summary = handle.join().unwrap();

        assert_eq!(summary.pages, 3);
        assert!(matches!(
            events.first(),
            Some(OperationEvent::ImageLoaded { bytes: 300, .. })
        ));
        assert!(matches!(events.last(), Some(OperationEvent::Done { .. })));
    }
}
