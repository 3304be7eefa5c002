use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use log::{debug, info};

use crate::core::{Error, ExtractError, MmapFile, RecordHeader, Result};
use crate::progress::ProgressTracker;
use crate::storage::reader::{ReadConfig, RecordStream, StreamIndex};
use crate::storage::spool::Spool;

/// Hands out one writer per extracted member.
///
/// `open` is called exactly once for every member that is materialized
/// and never for anything else.
pub trait SinkFactory {
    type Sink: Write;

    fn open(&mut self, name: &str) -> io::Result<Self::Sink>;
}

impl<F, W> SinkFactory for F
where
    F: FnMut(&str) -> io::Result<W>,
    W: Write,
{
    type Sink = W;

    fn open(&mut self, name: &str) -> io::Result<W> {
        self(name)
    }
}

/// Writes members as files below a root directory.
#[derive(Debug, Clone)]
pub struct DirectorySinks {
    root: PathBuf,
}

impl DirectorySinks {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a member name onto a path under the root. Names that would
    /// escape it are refused.
    pub fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        let mut path = self.root.clone();
        let mut parts = 0usize;
        for component in Path::new(name).components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    parts += 1;
                }
                _ => return Err(unsafe_name(name)),
            }
        }
        if parts == 0 {
            return Err(unsafe_name(name));
        }
        Ok(path)
    }
}

impl SinkFactory for DirectorySinks {
    type Sink = BufWriter<File>;

    fn open(&mut self, name: &str) -> io::Result<Self::Sink> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(BufWriter::new(File::create(path)?))
    }
}

fn unsafe_name(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("member name {name:?} does not stay under the output directory"),
    )
}

/// Which members an extraction pass materializes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Names(BTreeSet<String>),
}

impl Selection {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selection::Names(names.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Selection::Names(names) if names.is_empty())
    }
}

/// Requested names not yet seen in the stream.
struct Outstanding {
    all: bool,
    pending: BTreeSet<String>,
}

impl Outstanding {
    fn new(selection: Selection) -> Self {
        match selection {
            Selection::All => Self {
                all: true,
                pending: BTreeSet::new(),
            },
            Selection::Names(pending) => Self {
                all: false,
                pending,
            },
        }
    }

    fn take(&mut self, name: &str) -> bool {
        self.all || self.pending.remove(name)
    }

    fn any_left(&self) -> bool {
        self.all || !self.pending.is_empty()
    }
}

/// Materializes the named members into sinks from `sinks`.
///
/// One forward pass over the whole body, like listing. Requesting no names
/// returns `Ok(0)` without reading `input`. Names absent from the container
/// are reported as `NoMatchingMembers` after every present member has been
/// written.
pub fn extract<R, I, N, F>(
    input: R,
    wanted: I,
    sinks: F,
    config: &ReadConfig,
    progress: &mut ProgressTracker<'_>,
) -> std::result::Result<usize, ExtractError>
where
    R: Read,
    I: IntoIterator<Item = N>,
    N: Into<String>,
    F: SinkFactory,
{
    extract_selection(input, Selection::names(wanted), sinks, config, progress)
}

pub fn extract_all<R: Read, F: SinkFactory>(
    input: R,
    sinks: F,
    config: &ReadConfig,
    progress: &mut ProgressTracker<'_>,
) -> std::result::Result<usize, ExtractError> {
    extract_selection(input, Selection::All, sinks, config, progress)
}

/// [`extract_selection`] over a memory-mapped container file.
pub fn extract_at<F: SinkFactory>(
    path: &Path,
    selection: Selection,
    sinks: F,
    config: &ReadConfig,
    progress: &mut ProgressTracker<'_>,
) -> std::result::Result<usize, ExtractError> {
    if selection.is_empty() {
        return Ok(0);
    }
    let map = MmapFile::open(path)?;
    extract_selection(map.as_slice(), selection, sinks, config, progress)
}

pub fn extract_selection<R: Read, F: SinkFactory>(
    input: R,
    selection: Selection,
    mut sinks: F,
    config: &ReadConfig,
    progress: &mut ProgressTracker<'_>,
) -> std::result::Result<usize, ExtractError> {
    if selection.is_empty() {
        return Ok(0);
    }

    let mut outstanding = Outstanding::new(selection);
    let mut extracted = 0usize;
    let outcome = (|| -> Result<()> {
        let mut stream = RecordStream::open(input, config)?;
        let mut index = StreamIndex::default();
        let mut spool = Spool::new();
        let chunk_size = config.chunk_size.max(1);

        while let Some(header) = stream.next_record(progress)? {
            index.admit(&header)?;
            let requested = outstanding.take(header.name());

            match &header {
                RecordHeader::Data {
                    name, alias_count, ..
                } => {
                    let retain = *alias_count > 0 && outstanding.any_left();
                    if !requested && !retain {
                        debug!("skip {name}");
                        continue;
                    }

                    let mut sink = if requested {
                        Some(open_sink(&mut sinks, name)?)
                    } else {
                        None
                    };
                    if retain {
                        spool.begin(name)?;
                    }
                    stream.read_payload(progress, |chunk| {
                        if let Some(sink) = sink.as_mut() {
                            sink.write_all(chunk).map_err(|err| sink_err(name, err))?;
                        }
                        if retain {
                            spool.write(chunk)?;
                        }
                        Ok(())
                    })?;
                    if retain {
                        spool.commit(*alias_count);
                    }
                    if let Some(mut sink) = sink {
                        sink.flush().map_err(|err| sink_err(name, err))?;
                        extracted += 1;
                        debug!("extracted {name}");
                    }
                }
                RecordHeader::Link { name, target } => {
                    if requested {
                        let mut sink = open_sink(&mut sinks, name)?;
                        spool.replay(target, chunk_size, |chunk| {
                            sink.write_all(chunk).map_err(|err| sink_err(name, err))
                        })?;
                        sink.flush().map_err(|err| sink_err(name, err))?;
                        extracted += 1;
                        debug!("extracted {name} from {target}");
                    }
                    spool.release(target);
                }
                RecordHeader::End { .. } => {}
            }
        }
        progress.finish();

        if !outstanding.pending.is_empty() {
            let missing = std::mem::take(&mut outstanding.pending);
            return Err(Error::NoMatchingMembers(missing.into_iter().collect()));
        }
        Ok(())
    })();

    match outcome {
        Ok(()) => {
            info!("extracted {extracted} members");
            Ok(extracted)
        }
        Err(err) => Err(ExtractError::new(extracted, err)),
    }
}

fn open_sink<F: SinkFactory>(sinks: &mut F, name: &str) -> Result<F::Sink> {
    sinks.open(name).map_err(|err| sink_err(name, err))
}

fn sink_err(name: &str, source: io::Error) -> Error {
    Error::SinkWrite {
        name: name.to_string(),
        source,
    }
}
