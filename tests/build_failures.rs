use std::fs;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use solidpak::{
    build, build_to_path, list_members, BuildConfig, CancelToken, Error, ProgressTracker, Source,
    SourceEntry,
};
use tempfile::tempdir;

/// Serves different bytes on every open, like a file rewritten between
/// the scan and the write.
struct Shifting {
    opens: AtomicUsize,
}

impl Source for Shifting {
    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Cursor::new(format!("version {n}").into_bytes())))
    }
}

struct Unreadable;

impl Source for Unreadable {
    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
    }
}

#[test]
fn unreadable_sources_are_skipped_at_scan_time() {
    let sources = vec![
        SourceEntry::memory("ok.txt", b"fine".to_vec()),
        SourceEntry::new("locked.txt", Unreadable),
    ];
    let mut out = Cursor::new(Vec::new());
    let report = build(&sources, &mut out, &BuildConfig::default(), &mut ProgressTracker::disabled())
        .expect("build");

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].name, "locked.txt");
    let names: Vec<_> = list_members(&out.into_inner()[..])
        .expect("list")
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["ok.txt"]);
}

#[test]
fn source_changed_after_scan_aborts_without_valid_magic() {
    let sources = vec![SourceEntry::new(
        "moving.txt",
        Shifting {
            opens: AtomicUsize::new(0),
        },
    )];
    let mut out = Cursor::new(Vec::new());
    let err = build(&sources, &mut out, &BuildConfig::default(), &mut ProgressTracker::disabled())
        .unwrap_err();
    assert!(matches!(err, Error::SourceRead { ref name, .. } if name == "moving.txt"));

    let partial = out.into_inner();
    assert!(matches!(list_members(&partial[..]), Err(Error::InvalidMagic)));
}

#[test]
fn failed_build_to_path_leaves_no_files() {
    let dir = tempdir().expect("tempdir");
    let target = dir.path().join("out.spk");
    let sources = vec![SourceEntry::new(
        "moving.txt",
        Shifting {
            opens: AtomicUsize::new(0),
        },
    )];

    let err = build_to_path(
        &sources,
        &target,
        &BuildConfig::default(),
        &mut ProgressTracker::disabled(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::SourceRead { .. }));
    assert!(!target.exists());
    assert_eq!(fs::read_dir(dir.path()).expect("read_dir").count(), 0);
}

#[test]
fn failed_build_keeps_previous_container() {
    let dir = tempdir().expect("tempdir");
    let target = dir.path().join("out.spk");
    build_to_path(
        &[SourceEntry::memory("a.txt", b"first".to_vec())],
        &target,
        &BuildConfig::default(),
        &mut ProgressTracker::disabled(),
    )
    .expect("first build");
    let before = fs::read(&target).expect("read");

    let sources = vec![SourceEntry::new(
        "moving.txt",
        Shifting {
            opens: AtomicUsize::new(0),
        },
    )];
    build_to_path(&sources, &target, &BuildConfig::default(), &mut ProgressTracker::disabled())
        .unwrap_err();
    assert_eq!(fs::read(&target).expect("read"), before);
}

#[test]
fn cancellation_mid_stream_stops_the_build() {
    let dir = tempdir().expect("tempdir");
    let target = dir.path().join("out.spk");
    let cancel = CancelToken::new();
    let config = BuildConfig {
        chunk_size: 4,
        cancel: cancel.clone(),
        ..BuildConfig::default()
    };
    let sources = vec![SourceEntry::memory("big.bin", vec![7u8; 256])];

    let trip = cancel.clone();
    let mut observer = move |_: u64, _: Option<u64>| trip.cancel();
    let mut progress = ProgressTracker::new(&mut observer, Duration::ZERO);
    let err = build_to_path(&sources, &target, &config, &mut progress).unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(!target.exists());
}

#[test]
fn name_problems_are_rejected_before_writing() {
    let mut out = Cursor::new(Vec::new());
    let dup = vec![
        SourceEntry::memory("same", b"1".to_vec()),
        SourceEntry::memory("same", b"2".to_vec()),
    ];
    let err = build(&dup, &mut out, &BuildConfig::default(), &mut ProgressTracker::disabled())
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateName(ref name) if name == "same"));

    let empty = vec![SourceEntry::memory("", b"x".to_vec())];
    let err = build(&empty, &mut out, &BuildConfig::default(), &mut ProgressTracker::disabled())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidName(_)));
    assert!(out.into_inner().is_empty());
}
