//! File-backed byte sources for trace files

use crate::{
    error::{Result, StorageError},
    ids::OpenMode,
};

use memmap2::Mmap;
use std::fs::OpenOptions;
use std::ops::Deref;
use std::path::Path;

/// Raw bytes of a trace file, either memory-mapped or held in memory
pub enum TraceBytes {
    /// Read-only mapping of a file on disk
    Mapped(Mmap),
    /// Owned buffer (built in memory or read from a non-mappable source)
    Owned(Vec<u8>),
}

impl TraceBytes {
    /// Map the file at `path`. The handle is opened with write permission in
    /// [`OpenMode::ReadWrite`] so the caller holds the same access rights it
    /// asked for; the mapping itself is always read-only.
    pub fn map<P: AsRef<Path>>(path: P, mode: OpenMode, min_len: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::ReadWrite)
            .open(path)?;

        let len = file.metadata()?.len();
        if len < min_len as u64 {
            return Err(StorageError::invalid_format(format!(
                "{}: file is {} bytes, smaller than the {}-byte header",
                path.display(),
                len,
                min_len
            )));
        }

        // SAFETY: the mapping is read-only and trace files are written once by
        // `TraceFileWriter`; concurrent truncation by another process is not
        // supported.
        let map = unsafe { Mmap::map(&file) }?;
        Ok(Self::Mapped(map))
    }

    /// True if the bytes come from a file mapping
    pub fn is_mapped(&self) -> bool {
        matches!(self, Self::Mapped(_))
    }
}

impl Deref for TraceBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Owned(buf) => buf,
        }
    }
}

impl std::fmt::Debug for TraceBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_mapped() { "Mapped" } else { "Owned" };
        write!(f, "TraceBytes::{}({} bytes)", kind, self.len())
    }
}
