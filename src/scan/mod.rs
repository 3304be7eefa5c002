//! Content scanning: per-source size, blake3 digest and leading bytes,
//! computed in parallel before anything is written.

mod scanner;
mod source;

pub use scanner::{
    default_workers, extension_of, fingerprint, scan, validate_names, Entry, Fingerprint,
    ScanOptions, ScanReport, SkippedSource, DEFAULT_CHUNK_SIZE, DEFAULT_PREFIX_LEN,
};
pub use source::{collect_dir, FileSource, MemorySource, Source, SourceEntry};
