use std::collections::HashMap;
use std::io::{self, BufReader, Read};
use std::path::Path;

use log::info;
use serde::Serialize;
use zstd::stream::read::Decoder;

use crate::core::header::{map_stream_err, CONTAINER_HEADER_LEN, DIGEST_LEN};
use crate::core::{check_container_header, CancelToken, Error, MmapFile, RecordHeader, Result};
use crate::progress::ProgressTracker;
use crate::scan::DEFAULT_CHUNK_SIZE;
use crate::storage::body_digest::HashingReader;
use crate::storage::compression::body_decoder;

#[derive(Debug, Clone)]
pub struct ReadConfig {
    /// Size of the buffer payload bytes are decompressed into.
    pub chunk_size: usize,
    pub cancel: CancelToken,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            cancel: CancelToken::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MemberKind {
    Data { size: u64 },
    /// Stored as a reference to an earlier Data member with the same content.
    Link { target: String, size: u64 },
}

/// One entry of the archive index, in stream order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub kind: MemberKind,
}

impl MemberDescriptor {
    pub fn size(&self) -> u64 {
        match self.kind {
            MemberKind::Data { size } | MemberKind::Link { size, .. } => size,
        }
    }

    pub fn link_target(&self) -> Option<&str> {
        match &self.kind {
            MemberKind::Link { target, .. } => Some(target),
            MemberKind::Data { .. } => None,
        }
    }
}

struct PendingPayload {
    size: u64,
    digest: [u8; DIGEST_LEN],
}

/// Front-to-back reader over the decompressed record stream.
///
/// There is no directory: every caller, whether it wants one member or
/// the whole listing, decompresses the body from the start. A payload not
/// consumed through [`RecordStream::read_payload`] is skipped (and still
/// verified) by the next call to [`RecordStream::next_record`].
pub struct RecordStream<R: Read> {
    decoder: Decoder<'static, BufReader<HashingReader<R>>>,
    body_digest: [u8; DIGEST_LEN],
    chunk: Vec<u8>,
    cancel: CancelToken,
    pending: Option<PendingPayload>,
    records_read: u64,
    done: bool,
}

impl<R: Read> RecordStream<R> {
    /// Checks the container header and prepares the body decoder.
    pub fn open(mut input: R, config: &ReadConfig) -> Result<Self> {
        let mut header = [0u8; CONTAINER_HEADER_LEN];
        let n = read_up_to(&mut input, &mut header)?;
        let body_digest = check_container_header(&header[..n])?;

        Ok(Self {
            decoder: body_decoder(HashingReader::new(input))?,
            body_digest,
            chunk: vec![0u8; config.chunk_size.max(1)],
            cancel: config.cancel.clone(),
            pending: None,
            records_read: 0,
            done: false,
        })
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Returns the next Data or Link header, or `None` after the End record
    /// has been read and the stream verified to be complete.
    pub fn next_record(&mut self, progress: &mut ProgressTracker<'_>) -> Result<Option<RecordHeader>> {
        if self.done {
            return Ok(None);
        }
        self.cancel.check()?;
        if self.pending.is_some() {
            self.read_payload(progress, |_| Ok(()))?;
        }

        let header = RecordHeader::decode(&mut self.decoder)?;
        match &header {
            RecordHeader::End { member_count } => {
                if *member_count != self.records_read {
                    return Err(Error::corrupt(format!(
                        "end record counts {member_count} members, stream had {}",
                        self.records_read
                    )));
                }
                self.drain_trailing()?;
                self.done = true;
                return Ok(None);
            }
            RecordHeader::Data { size, digest, .. } => {
                self.pending = Some(PendingPayload {
                    size: *size,
                    digest: *digest,
                });
            }
            RecordHeader::Link { .. } => {}
        }
        self.records_read += 1;
        Ok(Some(header))
    }

    /// Streams the payload of the current Data record through `on_chunk`,
    /// verifying its digest. Returns the payload length.
    pub fn read_payload<F>(&mut self, progress: &mut ProgressTracker<'_>, mut on_chunk: F) -> Result<u64>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let Some(pending) = self.pending.take() else {
            return Ok(0);
        };

        let mut hasher = blake3::Hasher::new();
        let mut remaining = pending.size;
        while remaining > 0 {
            self.cancel.check()?;
            let want = remaining.min(self.chunk.len() as u64) as usize;
            self.decoder
                .read_exact(&mut self.chunk[..want])
                .map_err(map_stream_err)?;
            hasher.update(&self.chunk[..want]);
            on_chunk(&self.chunk[..want])?;
            remaining -= want as u64;
            progress.advance(want as u64);
        }

        if hasher.finalize().as_bytes() != &pending.digest {
            return Err(Error::corrupt("payload digest mismatch"));
        }
        Ok(pending.size)
    }

    /// Reads to the end of the compressed body. This is where the frame
    /// checksum and the digest of the compressed bytes are checked and
    /// where trailing bytes are caught.
    fn drain_trailing(&mut self) -> Result<()> {
        let mut rest = [0u8; 64];
        loop {
            match self.decoder.read(&mut rest) {
                Ok(0) => break,
                Ok(_) => return Err(Error::corrupt("data after end record")),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(map_stream_err(err)),
            }
        }

        // The decoder has seen end of input, so every body byte went
        // through the hasher.
        if self.decoder.get_ref().get_ref().digest() != self.body_digest {
            return Err(Error::corrupt("compressed body digest mismatch"));
        }
        Ok(())
    }
}

/// Consistency checks shared by listing and extraction: unique names and
/// links that point back at an earlier Data record.
#[derive(Debug, Default)]
pub(crate) struct StreamIndex {
    data_sizes: HashMap<String, u64>,
    links: HashMap<String, String>,
}

impl StreamIndex {
    pub(crate) fn admit(&mut self, header: &RecordHeader) -> Result<MemberDescriptor> {
        let name = header.name();
        if self.data_sizes.contains_key(name) || self.links.contains_key(name) {
            return Err(Error::corrupt(format!("member {name:?} appears twice")));
        }
        match header {
            RecordHeader::Data { name, size, .. } => {
                self.data_sizes.insert(name.clone(), *size);
                Ok(MemberDescriptor {
                    name: name.clone(),
                    kind: MemberKind::Data { size: *size },
                })
            }
            RecordHeader::Link { name, target } => {
                let size = *self.data_sizes.get(target).ok_or_else(|| {
                    Error::corrupt(format!("link {name:?} points at unknown member {target:?}"))
                })?;
                self.links.insert(name.clone(), target.clone());
                Ok(MemberDescriptor {
                    name: name.clone(),
                    kind: MemberKind::Link {
                        target: target.clone(),
                        size,
                    },
                })
            }
            RecordHeader::End { .. } => Err(Error::corrupt("unexpected end record")),
        }
    }
}

/// Lists every member of a container, in write order.
///
/// Costs a full decompression of the body regardless of how many members
/// the caller cares about; the format has no directory.
pub fn list_members<R: Read>(input: R) -> Result<Vec<MemberDescriptor>> {
    list_members_with(input, &ReadConfig::default(), &mut ProgressTracker::disabled())
}

pub fn list_members_with<R: Read>(
    input: R,
    config: &ReadConfig,
    progress: &mut ProgressTracker<'_>,
) -> Result<Vec<MemberDescriptor>> {
    let mut stream = RecordStream::open(input, config)?;
    let mut index = StreamIndex::default();
    let mut members = Vec::new();

    while let Some(header) = stream.next_record(progress)? {
        members.push(index.admit(&header)?);
    }
    progress.finish();

    info!("listed {} members", members.len());
    Ok(members)
}

/// [`list_members`] over a memory-mapped container file.
pub fn list_members_at(path: &Path) -> Result<Vec<MemberDescriptor>> {
    let map = MmapFile::open(path)?;
    list_members(map.as_slice())
}

fn read_up_to<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(Error::Io(err)),
        }
    }
    Ok(filled)
}
