use std::fs::File;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::core::Result;

/// Read-only mapping of a finished container.
pub struct MmapFile {
    _file: File,
    map: Option<Mmap>,
}

impl MmapFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        // Zero-length files cannot be mapped; they read as an empty slice
        // and fail header validation like any other short input.
        let map = if len == 0 {
            None
        } else {
            // SAFETY: containers are immutable once published; the map is
            // only read through shared slices.
            Some(unsafe { MmapOptions::new().len(len).map(&file)? })
        };
        Ok(Self { _file: file, map })
    }

    pub fn as_slice(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
