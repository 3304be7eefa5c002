use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid magic: not a solidpak container")]
    InvalidMagic,

    #[error("unsupported container version: {found}")]
    UnsupportedVersion { found: u8 },

    #[error("unsupported container version: legacy single-file format")]
    LegacyContainer,

    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    #[error("failed to read source {name}: {source}")]
    SourceRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no matching member: {}", .0.join(", "))]
    NoMatchingMembers(Vec<String>),

    #[error("failed to write member {name}: {source}")]
    SinkWrite {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid member name: {0:?}")]
    InvalidName(String),

    #[error("duplicate member name: {0}")]
    DuplicateName(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptStream(msg.into())
    }

    /// True for the kinds that mean "this container cannot be trusted".
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::CorruptStream(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of an extraction pass, carrying the number of members that were
/// fully written before it stopped.
#[derive(Debug, Error)]
#[error("extraction stopped after {extracted} member(s): {error}")]
pub struct ExtractError {
    pub extracted: usize,
    #[source]
    pub error: Error,
}

impl ExtractError {
    pub fn new(extracted: usize, error: Error) -> Self {
        Self { extracted, error }
    }

    pub fn kind(&self) -> &Error {
        &self.error
    }
}

impl From<Error> for ExtractError {
    fn from(error: Error) -> Self {
        Self::new(0, error)
    }
}
