use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::core::header::CONTAINER_HEADER_LEN;
use crate::core::{
    encode_container_header, CancelToken, Error, NormalizedMetadata, RecordHeader, Result,
};
use crate::plan::{Placement, Plan};
use crate::progress::ProgressTracker;
use crate::scan::{self, ScanOptions, SkippedSource, Source, SourceEntry};
use crate::storage::body_digest::HashingWriter;
use crate::storage::compression::{body_encoder, CompressionProfile};

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub profile: CompressionProfile,
    /// Hashing threads used by the scan phase.
    pub scan_workers: usize,
    /// Read size for hashing and for streaming payloads into the encoder.
    pub chunk_size: usize,
    /// Number of leading bytes used as the first placement sort key.
    pub prefix_len: usize,
    pub cancel: CancelToken,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let scan = ScanOptions::default();
        Self {
            profile: CompressionProfile::default(),
            scan_workers: scan.workers,
            chunk_size: scan.chunk_size,
            prefix_len: scan.prefix_len,
            cancel: CancelToken::new(),
        }
    }
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.profile.validate()?;
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be > 0".into()));
        }
        Ok(())
    }

    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            workers: self.scan_workers.max(1),
            chunk_size: self.chunk_size,
            prefix_len: self.prefix_len,
        }
    }
}

#[derive(Debug, Default)]
pub struct BuildReport {
    /// Container bytes written, header included.
    pub bytes_written: u64,
    pub data_records: usize,
    pub link_records: usize,
    /// Source bytes streamed into the compressor.
    pub payload_bytes: u64,
    /// Sources that could not be read during the scan and were left out.
    pub skipped: Vec<SkippedSource>,
}

/// Builds a container from `sources` into `sink`.
///
/// The sink is written starting at its current position. The header is
/// first written as zeros and only stamped with the real magic and the
/// blake3 digest of the compressed body once that body is complete, so a
/// build that fails midway leaves behind bytes that every reader rejects
/// as `InvalidMagic`.
pub fn build<W: Write + Seek>(
    sources: &[SourceEntry],
    mut sink: W,
    config: &BuildConfig,
    progress: &mut ProgressTracker<'_>,
) -> Result<BuildReport> {
    config.validate()?;
    let cancel = &config.cancel;

    let scanned = scan::scan(sources, &config.scan_options(), cancel)?;
    let plan = Plan::new(scanned.entries);

    let mut records = Vec::with_capacity(plan.len());
    for placement in plan.placements() {
        records.push(record_header(placement).encode()?);
    }
    let end = RecordHeader::End {
        member_count: plan.len() as u64,
    }
    .encode()?;
    let body_len = records.iter().map(|r| r.len() as u64).sum::<u64>()
        + plan.payload_bytes()
        + end.len() as u64;

    progress.set_total(Some(plan.payload_bytes()));

    let start = sink.stream_position()?;
    sink.write_all(&[0u8; CONTAINER_HEADER_LEN])?;

    let mut hashed = HashingWriter::new(&mut sink);
    let mut encoder = body_encoder(&mut hashed, &config.profile, body_len)?;
    let mut buf = vec![0u8; config.chunk_size];
    for (placement, header) in plan.placements().iter().zip(&records) {
        cancel.check()?;
        encoder.write_all(header)?;

        match placement {
            Placement::Data { entry, .. } => {
                debug!("data {} ({} bytes)", entry.name, entry.size);
                let source = sources[entry.index].source.as_ref();
                stream_source(
                    &entry.name,
                    source,
                    entry.size,
                    &entry.digest,
                    &mut encoder,
                    &mut buf,
                    cancel,
                    progress,
                )?;
            }
            Placement::Link { entry, target } => {
                debug!("link {} -> {}", entry.name, target);
            }
        }
    }
    encoder.write_all(&end)?;
    encoder.finish()?;
    let body_digest = hashed.digest();

    let finish = sink.stream_position()?;
    sink.seek(SeekFrom::Start(start))?;
    sink.write_all(&encode_container_header(&body_digest))?;
    sink.seek(SeekFrom::Start(finish))?;
    sink.flush()?;

    progress.finish();

    let report = BuildReport {
        bytes_written: finish - start,
        data_records: plan.data_count(),
        link_records: plan.link_count(),
        payload_bytes: plan.payload_bytes(),
        skipped: scanned.skipped,
    };
    info!(
        "built container: {} data, {} links, {} payload bytes -> {} bytes, {} skipped",
        report.data_records,
        report.link_records,
        report.payload_bytes,
        report.bytes_written,
        report.skipped.len()
    );
    Ok(report)
}

/// Builds into `<path>.tmp` and renames over `path` only on success.
pub fn build_to_path(
    sources: &[SourceEntry],
    path: &Path,
    config: &BuildConfig,
    progress: &mut ProgressTracker<'_>,
) -> Result<BuildReport> {
    let tmp = tmp_path_for(path)?;
    let _ = std::fs::remove_file(&tmp);

    let result = (|| -> Result<BuildReport> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        let report = build(sources, &mut file, config, progress)?;
        file.sync_all()?;
        Ok(report)
    })();

    match result {
        Ok(report) => {
            std::fs::rename(&tmp, path)?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fsync_dir(parent)?;
            }
            Ok(report)
        }
        Err(err) => {
            let _ = std::fs::remove_file(&tmp);
            Err(err)
        }
    }
}

fn record_header(placement: &Placement) -> RecordHeader {
    match placement {
        Placement::Data { entry, alias_count } => RecordHeader::Data {
            name: entry.name.clone(),
            size: entry.size,
            metadata: NormalizedMetadata::normalized(),
            digest: entry.digest,
            alias_count: *alias_count,
        },
        Placement::Link { entry, target } => RecordHeader::Link {
            name: entry.name.clone(),
            target: target.clone(),
        },
    }
}

/// Copies exactly `size` bytes of a source into the encoder, checking that
/// it still matches what the scan saw.
#[allow(clippy::too_many_arguments)]
fn stream_source<W: Write>(
    name: &str,
    source: &dyn Source,
    size: u64,
    digest: &[u8; 32],
    out: &mut W,
    buf: &mut [u8],
    cancel: &CancelToken,
    progress: &mut ProgressTracker<'_>,
) -> Result<()> {
    let source_err = |source: io::Error| Error::SourceRead {
        name: name.to_string(),
        source,
    };

    let mut reader = source.open().map_err(source_err)?;
    let mut hasher = blake3::Hasher::new();
    let mut remaining = size;

    while remaining > 0 {
        cancel.check()?;
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => return Err(source_err(changed_since_scan())),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(source_err(err)),
        };
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n])?;
        remaining -= n as u64;
        progress.advance(n as u64);
    }

    let mut extra = [0u8; 1];
    let grew = loop {
        match reader.read(&mut extra) {
            Ok(n) => break n > 0,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(source_err(err)),
        }
    };
    if grew || hasher.finalize().as_bytes() != digest {
        return Err(source_err(changed_since_scan()));
    }
    Ok(())
}

fn changed_since_scan() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "source changed since it was scanned")
}

fn tmp_path_for(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::InvalidConfig(format!("missing filename for {}", path.display())))?
        .to_string_lossy();
    Ok(path.with_file_name(format!("{name}.tmp")))
}

fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MAGIC;
    use std::io::Cursor;

    fn small_config() -> BuildConfig {
        BuildConfig {
            scan_workers: 2,
            ..BuildConfig::default()
        }
    }

    #[test]
    fn header_is_stamped_after_body() {
        let sources = vec![SourceEntry::memory("a.txt", b"hello".to_vec())];
        let mut out = Cursor::new(Vec::new());
        let report = build(&sources, &mut out, &small_config(), &mut ProgressTracker::disabled())
            .expect("build");
        let bytes = out.into_inner();
        assert_eq!(report.bytes_written, bytes.len() as u64);
        let body_digest = blake3::hash(&bytes[CONTAINER_HEADER_LEN..]);
        assert_eq!(
            &bytes[..CONTAINER_HEADER_LEN],
            &encode_container_header(body_digest.as_bytes())
        );
        assert_eq!(report.data_records, 1);
        assert_eq!(report.link_records, 0);
    }

    #[test]
    fn build_appends_at_current_position() {
        let sources = vec![SourceEntry::memory("a.txt", b"hello".to_vec())];
        let mut out = Cursor::new(b"prefix".to_vec());
        out.seek(SeekFrom::End(0)).expect("seek");
        let report = build(&sources, &mut out, &small_config(), &mut ProgressTracker::disabled())
            .expect("build");
        let bytes = out.into_inner();
        assert_eq!(&bytes[..6], b"prefix");
        let header = &bytes[6..6 + CONTAINER_HEADER_LEN];
        assert_eq!(&header[..MAGIC.len()], &MAGIC);
        let body_digest = blake3::hash(&bytes[6 + CONTAINER_HEADER_LEN..]);
        assert_eq!(
            crate::core::check_container_header(header).expect("header"),
            *body_digest.as_bytes()
        );
        assert_eq!(report.bytes_written, bytes.len() as u64 - 6);
    }

    #[test]
    fn invalid_profile_fails_before_writing() {
        let config = BuildConfig {
            profile: CompressionProfile::default().with_window_log(40),
            ..BuildConfig::default()
        };
        let mut out = Cursor::new(Vec::new());
        let err = build(&[], &mut out, &config, &mut ProgressTracker::disabled()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(out.into_inner().is_empty());
    }

    #[test]
    fn tmp_path_keeps_directory() {
        let tmp = tmp_path_for(Path::new("/data/out.spk")).expect("tmp path");
        assert_eq!(tmp, PathBuf::from("/data/out.spk.tmp"));
    }
}
