//! Second-stage flash loader images, one per flash page size.
//!
//! The boot monitor can only write RAM, so each page goes through a small
//! loader that copies the page buffer into flash. The loader has to match
//! the chip's page size; images are supplied as raw binaries on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("read loader {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("loader {path} is empty")]
    Empty { path: PathBuf },
}

/// File name looked up by [`LoaderSet::from_dir`] for a page size.
pub fn loader_file_name(page_size: u32) -> String {
    format!("loader{page_size}.bin")
}

#[derive(Debug, Clone, Default)]
pub struct LoaderSet {
    images: BTreeMap<u32, Vec<u8>>,
}

impl LoaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, page_size: u32, image: Vec<u8>) -> Self {
        self.insert(page_size, image);
        self
    }

    pub fn insert(&mut self, page_size: u32, image: Vec<u8>) {
        self.images.insert(page_size, image);
    }

    /// Pick up `loader128.bin` and `loader256.bin` from `dir`; either may be absent.
    pub fn from_dir(dir: &Path) -> Result<Self, LoaderError> {
        let mut set = Self::new();
        for page_size in [128, 256] {
            let path = dir.join(loader_file_name(page_size));
            if path.is_file() {
                set.load_file(page_size, &path)?;
            }
        }
        Ok(set)
    }

    pub fn load_file(&mut self, page_size: u32, path: &Path) -> Result<(), LoaderError> {
        let image = std::fs::read(path).map_err(|e| LoaderError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if image.is_empty() {
            return Err(LoaderError::Empty {
                path: path.to_path_buf(),
            });
        }
        tracing::debug!(page_size, bytes = image.len(), path = %path.display(), "loader image");
        self.insert(page_size, image);
        Ok(())
    }

    pub fn for_page_size(&self, page_size: u32) -> Option<&[u8]> {
        self.images.get(&page_size).map(Vec::as_slice)
    }

    pub fn page_sizes(&self) -> impl Iterator<Item = u32> + '_ {
        self.images.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
