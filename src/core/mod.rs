//! Primitives shared by the scanner, writer and reader: error types, the
//! container and record header codec, clocks, cancellation and read-only
//! file mapping.

pub mod cancel;
pub mod clock;
pub mod error;
pub mod header;
pub mod mmap;

pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, QuantaClock};
pub use error::{Error, ExtractError, Result};
pub use header::{
    check_container_header, encode_container_header, validate_name, NormalizedMetadata,
    RecordHeader, RecordKind, BODY_DIGEST_OFFSET, CONTAINER_HEADER_LEN, FORMAT_VERSION,
    LEGACY_MAGIC, MAGIC,
};
pub use mmap::MmapFile;
