use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::core::{Error, Result};

#[derive(Debug, Clone, Copy)]
struct SpoolRange {
    offset: u64,
    len: u64,
    refs: u32,
}

/// Temporary copies of canonical payloads that later Link records need.
///
/// Backed by an anonymous temp file created on first use; everything is
/// dropped with the spool at the end of one extraction.
#[derive(Debug, Default)]
pub(crate) struct Spool {
    file: Option<File>,
    ranges: HashMap<String, SpoolRange>,
    end: u64,
    pending: Option<(String, u64)>,
}

impl Spool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&mut self, name: &str) -> Result<()> {
        if self.file.is_none() {
            self.file = Some(tempfile::tempfile()?);
        }
        let end = self.end;
        self.file_mut()?.seek(SeekFrom::Start(end))?;
        self.pending = Some((name.to_string(), end));
        Ok(())
    }

    pub(crate) fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.file_mut()?.write_all(chunk)?;
        self.end += chunk.len() as u64;
        Ok(())
    }

    /// Seals the payload started by [`Spool::begin`], keeping it until
    /// `refs` links have been released.
    pub(crate) fn commit(&mut self, refs: u32) {
        if let Some((name, offset)) = self.pending.take() {
            let len = self.end - offset;
            self.ranges.insert(name, SpoolRange { offset, len, refs });
        }
    }

    #[cfg(test)]
    fn contains(&self, name: &str) -> bool {
        self.ranges.contains_key(name)
    }

    /// Streams a retained payload back out in `chunk_size` pieces.
    pub(crate) fn replay<F>(&mut self, name: &str, chunk_size: usize, mut on_chunk: F) -> Result<u64>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let range = *self
            .ranges
            .get(name)
            .ok_or_else(|| Error::corrupt(format!("link target {name:?} was not retained")))?;

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(range.offset))?;
        let mut remaining = range.len;
        let mut buf = vec![0u8; chunk_size.max(1)];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            file.read_exact(&mut buf[..want])?;
            on_chunk(&buf[..want])?;
            remaining -= want as u64;
        }
        Ok(range.len)
    }

    /// Drops one reference; the entry is forgotten when none remain.
    pub(crate) fn release(&mut self, name: &str) {
        let exhausted = match self.ranges.get_mut(name) {
            Some(range) => {
                range.refs = range.refs.saturating_sub(1);
                range.refs == 0
            }
            None => false,
        };
        if exhausted {
            self.ranges.remove(name);
        }
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "spool not open")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay_all(spool: &mut Spool, name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        spool
            .replay(name, 3, |chunk| {
                out.extend_from_slice(chunk);
                Ok(())
            })
            .expect("replay");
        out
    }

    #[test]
    fn retained_payloads_replay_after_later_writes() {
        let mut spool = Spool::new();
        spool.begin("a").expect("begin");
        spool.write(b"hello ").expect("write");
        spool.write(b"world").expect("write");
        spool.commit(2);

        spool.begin("b").expect("begin");
        spool.write(b"second").expect("write");
        spool.commit(1);

        assert_eq!(replay_all(&mut spool, "a"), b"hello world");
        assert_eq!(replay_all(&mut spool, "b"), b"second");
        assert_eq!(replay_all(&mut spool, "a"), b"hello world");
    }

    #[test]
    fn release_forgets_after_last_reference() {
        let mut spool = Spool::new();
        spool.begin("a").expect("begin");
        spool.write(b"x").expect("write");
        spool.commit(2);

        spool.release("a");
        assert!(spool.contains("a"));
        spool.release("a");
        assert!(!spool.contains("a"));
        assert!(spool.replay("a", 8, |_| Ok(())).unwrap_err().is_corruption());
    }
}
