use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::core::{Error, Result};

/// A byte source that can be opened more than once.
///
/// The scanner reads every source once to hash it, and the writer opens
/// canonical sources a second time to stream them into the container.
pub trait Source: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>>;
}

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for FileSource {
    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(File::open(&self.path)?))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    bytes: Vec<u8>,
}

impl MemorySource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl Source for MemorySource {
    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(&self.bytes[..]))
    }
}

/// One `(name, source)` pair handed in by the caller.
pub struct SourceEntry {
    pub name: String,
    pub source: Box<dyn Source>,
}

impl SourceEntry {
    pub fn new(name: impl Into<String>, source: impl Source + 'static) -> Self {
        Self {
            name: name.into(),
            source: Box::new(source),
        }
    }

    pub fn memory(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(name, MemorySource::new(bytes))
    }

    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(name, FileSource::new(path))
    }
}

impl std::fmt::Debug for SourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceEntry").field("name", &self.name).finish()
    }
}

/// Collects every regular file under `root` as a [`FileSource`].
///
/// Names are the `/`-separated paths relative to `root`, sorted bytewise.
/// Symlinks and other special files are skipped.
pub fn collect_dir(root: &Path) -> Result<Vec<SourceEntry>> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
    Ok(files
        .into_iter()
        .map(|(name, path)| SourceEntry::file(name, path))
        .collect())
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<(String, PathBuf)>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect_files(root, &path, files)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        files.push((relative_name(root, &path)?, path));
    }
    Ok(())
}

fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| Error::InvalidName(path.to_string_lossy().into_owned()))?;

    let mut out = String::new();
    for (i, comp) in rel.components().enumerate() {
        if i != 0 {
            out.push('/');
        }
        let part = comp
            .as_os_str()
            .to_str()
            .ok_or_else(|| Error::InvalidName(rel.to_string_lossy().into_owned()))?;
        out.push_str(part);
    }
    Ok(out)
}
