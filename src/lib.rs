//! Solid, deduplicating archive container.
//!
//! A container is a 40-byte header followed by one zstd frame holding a
//! sequential record stream. The header carries a blake3 digest of the
//! compressed frame, checked once the frame has been read to the end.
//! Before anything is written the sources are hashed in parallel, sorted
//! so similar content sits close together in the compression window, and
//! deduplicated: the first member with a given digest is stored as a Data
//! record, later ones as Link records naming it.
//!
//! There is no directory. Listing members, verifying a container and
//! extracting a single member all decompress the body from the start, so
//! their cost is O(size of the container), not O(members requested). That
//! is the price of compressing every member in one window.
//!
//! ```no_run
//! use solidpak::{build, extract, list_members, BuildConfig, ProgressTracker, ReadConfig, SourceEntry};
//! use std::io::Cursor;
//!
//! let sources = vec![SourceEntry::memory("a.txt", b"hello".to_vec())];
//! let mut container = Cursor::new(Vec::new());
//! build(&sources, &mut container, &BuildConfig::default(), &mut ProgressTracker::disabled())?;
//!
//! let bytes = container.into_inner();
//! assert_eq!(list_members(&bytes[..])?.len(), 1);
//!
//! extract(
//!     &bytes[..],
//!     ["a.txt"],
//!     |name: &str| std::fs::File::create(name),
//!     &ReadConfig::default(),
//!     &mut ProgressTracker::disabled(),
//! )?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod core;
pub mod plan;
pub mod progress;
pub mod scan;
pub mod storage;

pub use crate::core::{CancelToken, Error, ExtractError, Result};
pub use progress::{ProgressObserver, ProgressTracker, DEFAULT_PROGRESS_INTERVAL};
pub use scan::{collect_dir, FileSource, MemorySource, Source, SourceEntry};
pub use storage::{
    build, build_to_path, extract, extract_all, extract_at, extract_selection, list_members,
    list_members_at, list_members_with, BuildConfig, BuildReport, CompressionProfile,
    DirectorySinks, MemberDescriptor, MemberKind, ReadConfig, Selection, SinkFactory,
};
