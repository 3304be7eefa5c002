use std::io::{self, Read};

use crate::core::{Error, Result};

/// Container signature; followed by [`FORMAT_VERSION`], one reserved byte
/// and the blake3 digest of the compressed body.
pub const MAGIC: [u8; 6] = *b"SLDPAK";
pub const FORMAT_VERSION: u8 = 2;
/// Signature of the single-file container this format replaced.
pub const LEGACY_MAGIC: [u8; 4] = *b"MYCP";
pub const BODY_DIGEST_OFFSET: usize = 8;
pub const CONTAINER_HEADER_LEN: usize = BODY_DIGEST_OFFSET + DIGEST_LEN;

pub const MAX_NAME_LEN: usize = u16::MAX as usize;
pub const DIGEST_LEN: usize = 32;

/// Fixed values written in place of owner, group, mode and timestamp.
pub const NORMALIZED_MODE: u32 = 0o100644;
pub const NORMALIZED_UID: u32 = 0;
pub const NORMALIZED_GID: u32 = 0;
pub const NORMALIZED_MTIME: u64 = 0;

const KIND_DATA: u8 = 0;
const KIND_LINK: u8 = 1;
const KIND_END: u8 = 0xFF;

pub fn encode_container_header(body_digest: &[u8; DIGEST_LEN]) -> [u8; CONTAINER_HEADER_LEN] {
    let mut buf = [0u8; CONTAINER_HEADER_LEN];
    buf[0..6].copy_from_slice(&MAGIC);
    buf[6] = FORMAT_VERSION;
    buf[BODY_DIGEST_OFFSET..].copy_from_slice(body_digest);
    buf
}

/// Validates the leading bytes of a container and returns the stored
/// digest of the compressed body.
///
/// `buf` may be shorter than [`CONTAINER_HEADER_LEN`] when the input is
/// truncated. Inputs too short to carry a signature are `InvalidMagic`;
/// a recognized signature with a cut-off digest is `CorruptStream`.
pub fn check_container_header(buf: &[u8]) -> Result<[u8; DIGEST_LEN]> {
    if buf.len() >= LEGACY_MAGIC.len() && buf[..LEGACY_MAGIC.len()] == LEGACY_MAGIC {
        return Err(Error::LegacyContainer);
    }
    if buf.len() <= MAGIC.len() || buf[0..6] != MAGIC {
        return Err(Error::InvalidMagic);
    }
    if buf[6] != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion { found: buf[6] });
    }
    if buf.len() < CONTAINER_HEADER_LEN {
        return Err(Error::corrupt("container header is truncated"));
    }
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&buf[BODY_DIGEST_OFFSET..CONTAINER_HEADER_LEN]);
    Ok(digest)
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains('\0') {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Data,
    Link,
    End,
}

/// Owner/time fields as stored in a Data record.
///
/// The writer always emits [`NormalizedMetadata::normalized`]; the fields
/// exist so every Data header has the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedMetadata {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u64,
}

impl NormalizedMetadata {
    pub const fn normalized() -> Self {
        Self {
            mode: NORMALIZED_MODE,
            uid: NORMALIZED_UID,
            gid: NORMALIZED_GID,
            mtime: NORMALIZED_MTIME,
        }
    }
}

impl Default for NormalizedMetadata {
    fn default() -> Self {
        Self::normalized()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordHeader {
    Data {
        name: String,
        size: u64,
        metadata: NormalizedMetadata,
        digest: [u8; DIGEST_LEN],
        /// Number of Link records further on that point at this one.
        alias_count: u32,
    },
    Link {
        name: String,
        target: String,
    },
    End {
        member_count: u64,
    },
}

impl RecordHeader {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordHeader::Data { .. } => RecordKind::Data,
            RecordHeader::Link { .. } => RecordKind::Link,
            RecordHeader::End { .. } => RecordKind::End,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RecordHeader::Data { name, .. } | RecordHeader::Link { name, .. } => name,
            RecordHeader::End { .. } => "",
        }
    }

    /// Bytes of payload that follow this header in the stream.
    pub fn payload_len(&self) -> u64 {
        match self {
            RecordHeader::Data { size, .. } => *size,
            _ => 0,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(64 + self.name().len());
        match self {
            RecordHeader::Data {
                name,
                size,
                metadata,
                digest,
                alias_count,
            } => {
                validate_name(name)?;
                put_str(&mut buf, name);
                buf.push(KIND_DATA);
                buf.extend_from_slice(&size.to_le_bytes());
                buf.extend_from_slice(&metadata.mode.to_le_bytes());
                buf.extend_from_slice(&metadata.uid.to_le_bytes());
                buf.extend_from_slice(&metadata.gid.to_le_bytes());
                buf.extend_from_slice(&metadata.mtime.to_le_bytes());
                buf.extend_from_slice(digest);
                buf.extend_from_slice(&alias_count.to_le_bytes());
            }
            RecordHeader::Link { name, target } => {
                validate_name(name)?;
                validate_name(target)?;
                put_str(&mut buf, name);
                buf.push(KIND_LINK);
                put_str(&mut buf, target);
            }
            RecordHeader::End { member_count } => {
                buf.extend_from_slice(&0u16.to_le_bytes());
                buf.push(KIND_END);
                buf.extend_from_slice(&member_count.to_le_bytes());
            }
        }
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Reads one header from a decompressed record stream.
    ///
    /// Every read failure is reported as `CorruptStream`: the stream is
    /// expected to continue until the End record.
    pub fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut r = CrcReader::new(reader);

        let name_len = u16::from_le_bytes(r.read_array()?) as usize;
        let name_bytes = r.read_vec(name_len)?;
        let kind = r.read_array::<1>()?[0];

        let header = match kind {
            KIND_DATA => {
                let name = decode_name(name_bytes)?;
                let size = u64::from_le_bytes(r.read_array()?);
                let mode = u32::from_le_bytes(r.read_array()?);
                let uid = u32::from_le_bytes(r.read_array()?);
                let gid = u32::from_le_bytes(r.read_array()?);
                let mtime = u64::from_le_bytes(r.read_array()?);
                let digest = r.read_array::<DIGEST_LEN>()?;
                let alias_count = u32::from_le_bytes(r.read_array()?);
                RecordHeader::Data {
                    name,
                    size,
                    metadata: NormalizedMetadata {
                        mode,
                        uid,
                        gid,
                        mtime,
                    },
                    digest,
                    alias_count,
                }
            }
            KIND_LINK => {
                let name = decode_name(name_bytes)?;
                let target_len = u16::from_le_bytes(r.read_array()?) as usize;
                let target = decode_name(r.read_vec(target_len)?)?;
                RecordHeader::Link { name, target }
            }
            KIND_END => {
                if name_len != 0 {
                    return Err(Error::corrupt("end record carries a name"));
                }
                let member_count = u64::from_le_bytes(r.read_array()?);
                RecordHeader::End { member_count }
            }
            other => return Err(Error::corrupt(format!("unknown record kind {other:#04x}"))),
        };

        let expected = r.finalize();
        let stored = u32::from_le_bytes(r.read_array()?);
        if stored != expected {
            return Err(Error::corrupt(format!(
                "record header crc mismatch for {:?}",
                header.name()
            )));
        }
        Ok(header)
    }
}

pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn put_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}

fn decode_name(bytes: Vec<u8>) -> Result<String> {
    let name =
        String::from_utf8(bytes).map_err(|_| Error::corrupt("member name is not utf-8"))?;
    validate_name(&name).map_err(|_| Error::corrupt(format!("invalid member name {name:?}")))?;
    Ok(name)
}

pub(crate) fn map_stream_err(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::corrupt("record stream ended early")
    } else {
        Error::corrupt(err.to_string())
    }
}

/// Reads header fields while accumulating their crc32.
struct CrcReader<'a, R> {
    inner: &'a mut R,
    hasher: crc32fast::Hasher,
}

impl<'a, R: Read> CrcReader<'a, R> {
    fn new(inner: &'a mut R) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf).map_err(map_stream_err)?;
        self.hasher.update(&buf);
        Ok(buf)
    }

    fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).map_err(map_stream_err)?;
        self.hasher.update(&buf);
        Ok(buf)
    }

    fn finalize(&mut self) -> u32 {
        std::mem::replace(&mut self.hasher, crc32fast::Hasher::new()).finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn data_header() -> RecordHeader {
        RecordHeader::Data {
            name: "docs/readme.txt".to_string(),
            size: 5,
            metadata: NormalizedMetadata::normalized(),
            digest: [7u8; DIGEST_LEN],
            alias_count: 2,
        }
    }

    #[test]
    fn container_header_carries_body_digest() {
        let digest = [9u8; DIGEST_LEN];
        let header = encode_container_header(&digest);
        assert_eq!(check_container_header(&header).expect("valid header"), digest);
    }

    #[test]
    fn signed_but_short_header_is_corrupt() {
        let header = encode_container_header(&[1u8; DIGEST_LEN]);
        let err = check_container_header(&header[..CONTAINER_HEADER_LEN - 1]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn container_header_classifies_signatures() {
        assert!(matches!(
            check_container_header(b"MYCP\x01\x00\x05a"),
            Err(Error::LegacyContainer)
        ));
        assert!(matches!(
            check_container_header(b"SLDPAK\x01\x00"),
            Err(Error::UnsupportedVersion { found: 1 })
        ));
        assert!(matches!(
            check_container_header(b"PK\x03\x04\x00\x00\x00\x00"),
            Err(Error::InvalidMagic)
        ));
        assert!(matches!(check_container_header(b"SLD"), Err(Error::InvalidMagic)));
        assert!(matches!(
            check_container_header(&[0u8; CONTAINER_HEADER_LEN]),
            Err(Error::InvalidMagic)
        ));
    }

    #[test]
    fn header_round_trip_preserves_fields() {
        let headers = [
            data_header(),
            RecordHeader::Link {
                name: "copy.txt".to_string(),
                target: "docs/readme.txt".to_string(),
            },
            RecordHeader::End { member_count: 3 },
        ];
        let mut stream = Vec::new();
        for header in &headers {
            stream.extend_from_slice(&header.encode().expect("encode"));
        }
        let mut cursor = Cursor::new(stream);
        for header in &headers {
            let decoded = RecordHeader::decode(&mut cursor).expect("decode");
            assert_eq!(&decoded, header);
        }
    }

    #[test]
    fn data_header_has_fixed_shape() {
        let bytes = data_header().encode().expect("encode");
        // name_len + name + kind + size + mode/uid/gid + mtime + digest + aliases + crc
        assert_eq!(bytes.len(), 2 + 15 + 1 + 8 + 12 + 8 + 32 + 4 + 4);
        let mtime_at = 2 + 15 + 1 + 8 + 12;
        assert_eq!(&bytes[mtime_at..mtime_at + 8], &[0u8; 8]);
    }

    #[test]
    fn flipped_header_byte_fails_crc() {
        let mut bytes = data_header().encode().expect("encode");
        bytes[20] ^= 0x01;
        let err = RecordHeader::decode(&mut Cursor::new(bytes)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn truncated_header_is_corrupt() {
        let bytes = data_header().encode().expect("encode");
        let err = RecordHeader::decode(&mut Cursor::new(&bytes[..10])).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(validate_name("").is_err());
        assert!(validate_name("a\0b").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
        assert!(validate_name("dir/file.bin").is_ok());
    }
}
