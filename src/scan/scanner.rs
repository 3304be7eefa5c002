use std::collections::HashSet;
use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use log::{debug, warn};

use crate::core::header::DIGEST_LEN;
use crate::core::{validate_name, CancelToken, Error, Result};
use crate::scan::source::{Source, SourceEntry};

pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;
pub const DEFAULT_PREFIX_LEN: usize = 16;

/// Scan-time identity of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub size: u64,
    pub digest: [u8; DIGEST_LEN],
    /// First few bytes of content; only used as a sort key.
    pub leading_bytes: Vec<u8>,
    pub extension: String,
    /// Position of the source in the caller's input.
    pub index: usize,
}

#[derive(Debug)]
pub struct SkippedSource {
    pub name: String,
    pub error: io::Error,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    /// Scanned entries in input order.
    pub entries: Vec<Entry>,
    pub skipped: Vec<SkippedSource>,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub workers: usize,
    pub chunk_size: usize,
    pub prefix_len: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            prefix_len: DEFAULT_PREFIX_LEN,
        }
    }
}

pub fn default_workers() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Content identity of a single source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    pub digest: [u8; DIGEST_LEN],
    pub leading_bytes: Vec<u8>,
}

/// Hashes a source in `chunk_size` reads, keeping its first `prefix_len` bytes.
pub fn fingerprint(source: &dyn Source, chunk_size: usize, prefix_len: usize) -> io::Result<Fingerprint> {
    let mut reader = source.open()?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut leading_bytes = Vec::with_capacity(prefix_len);
    let mut size = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if leading_bytes.len() < prefix_len {
            let take = (prefix_len - leading_bytes.len()).min(n);
            leading_bytes.extend_from_slice(&buf[..take]);
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok(Fingerprint {
        size,
        digest: hasher.finalize().into(),
        leading_bytes,
    })
}

/// Lowercased text after the last `.` of the final path component.
pub fn extension_of(name: &str) -> String {
    let file = name.rsplit('/').next().unwrap_or(name);
    match file.rfind('.') {
        Some(pos) if pos > 0 => file[pos + 1..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Rejects invalid or repeated names before any source is read.
pub fn validate_names(sources: &[SourceEntry]) -> Result<()> {
    let mut seen = HashSet::with_capacity(sources.len());
    for entry in sources {
        validate_name(&entry.name)?;
        if !seen.insert(entry.name.as_str()) {
            return Err(Error::DuplicateName(entry.name.clone()));
        }
    }
    Ok(())
}

/// Fingerprints every source on a bounded pool of scoped worker threads.
///
/// Workers claim sources through a shared cursor and keep their results
/// locally; the results are merged back into input order after join. A
/// source that fails to read is recorded in `skipped` and does not stop
/// the scan.
pub fn scan(sources: &[SourceEntry], options: &ScanOptions, cancel: &CancelToken) -> Result<ScanReport> {
    validate_names(sources)?;
    if sources.is_empty() {
        return Ok(ScanReport::default());
    }

    let workers = options.workers.clamp(1, sources.len());
    let cursor = AtomicUsize::new(0);

    let per_worker = thread::scope(|scope| -> Result<Vec<Vec<(usize, io::Result<Fingerprint>)>>> {
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let cursor = &cursor;
            let handle = thread::Builder::new()
                .name(format!("solidpak-scan-{worker_id}"))
                .spawn_scoped(scope, move || {
                    let mut results = Vec::new();
                    while !cancel.is_cancelled() {
                        let index = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(entry) = sources.get(index) else {
                            break;
                        };
                        let result = fingerprint(
                            entry.source.as_ref(),
                            options.chunk_size,
                            options.prefix_len,
                        );
                        results.push((index, result));
                    }
                    results
                })?;
            handles.push(handle);
        }

        let mut joined = Vec::with_capacity(handles.len());
        for handle in handles {
            let results = handle.join().map_err(|_| {
                Error::Io(io::Error::new(io::ErrorKind::Other, "scan worker panicked"))
            })?;
            joined.push(results);
        }
        Ok(joined)
    })?;

    cancel.check()?;

    let mut slots: Vec<Option<io::Result<Fingerprint>>> = (0..sources.len()).map(|_| None).collect();
    for (index, result) in per_worker.into_iter().flatten() {
        slots[index] = Some(result);
    }

    let mut report = ScanReport::default();
    for (index, (entry, slot)) in sources.iter().zip(slots).enumerate() {
        match slot {
            Some(Ok(fp)) => {
                debug!("scanned {} ({} bytes)", entry.name, fp.size);
                report.entries.push(Entry {
                    name: entry.name.clone(),
                    size: fp.size,
                    digest: fp.digest,
                    leading_bytes: fp.leading_bytes,
                    extension: extension_of(&entry.name),
                    index,
                });
            }
            Some(Err(error)) => {
                warn!("skipping {}: {}", entry.name, error);
                report.skipped.push(SkippedSource {
                    name: entry.name.clone(),
                    error,
                });
            }
            None => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::Other,
                    format!("source {} was never scanned", entry.name),
                )))
            }
        }
    }
    Ok(report)
}
