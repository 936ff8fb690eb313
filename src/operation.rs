use crate::chip::ChipInfo;

/// Progress reported by an upload, in the order it happens.
#[derive(Debug, Clone)]
pub enum OperationEvent {
    ImageLoaded {
        path: String,
        bytes: usize,
    },
    Connected {
        device: String,
        chip: ChipInfo,
        identified: bool,
    },
    LoaderStaged {
        device: String,
        page_size: u32,
        bytes: usize,
    },
    WriteStart {
        device: String,
        pages: usize,
        page_size: u32,
    },
    /// Emitted every few pages and always for the last one.
    Progress {
        device: String,
        page: usize,
        pages: usize,
        percent: u8,
    },
    BootBitSet {
        device: String,
    },
    Reset {
        device: String,
    },
    Done {
        device: String,
    },
}
