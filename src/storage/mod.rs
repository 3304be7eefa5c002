//! Container writing, listing and extraction.

mod body_digest;
pub mod compression;
mod extract;
mod reader;
mod spool;
mod writer;

pub use compression::{CompressionProfile, MAX_LEVEL, MAX_WINDOW_LOG, MIN_WINDOW_LOG};
pub use extract::{
    extract, extract_all, extract_at, extract_selection, DirectorySinks, Selection, SinkFactory,
};
pub use reader::{
    list_members, list_members_at, list_members_with, MemberDescriptor, MemberKind, ReadConfig,
    RecordStream,
};
pub use writer::{build, build_to_path, BuildConfig, BuildReport};
