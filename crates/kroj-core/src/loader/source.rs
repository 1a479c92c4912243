//! Byte sources and their canonical identities.

use crate::error::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use url::Url;

/// Where the bytes of a descriptor-set container come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// An in-memory buffer
    Bytes(Bytes),
    /// A file on disk
    Path(PathBuf),
    /// A URL opened through the loader's [`Locator`]
    Url(String),
}

impl Source {
    /// Human-readable identity used in error messages
    pub fn describe(&self) -> String {
        match self {
            Source::Bytes(bytes) => format!("<{} bytes in memory>", bytes.len()),
            Source::Path(path) => path.display().to_string(),
            Source::Url(url) => url.clone(),
        }
    }
}

impl From<Bytes> for Source {
    fn from(bytes: Bytes) -> Self {
        Source::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Source {
    fn from(bytes: Vec<u8>) -> Self {
        Source::Bytes(Bytes::from(bytes))
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::Path(path)
    }
}

impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Source::Path(path.to_path_buf())
    }
}

/// Canonical cache key of a source.
///
/// Two loads with equal identities are the same load: the second one is
/// served from the cache without touching the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceId {
    /// Canonicalized file path
    Path(PathBuf),
    /// URL string as given
    Url(String),
    /// BLAKE3 fingerprint (hex) of in-memory or streamed content
    Content(String),
    /// Ordered identities of a multi-source load
    Composite(Vec<SourceId>),
}

impl SourceId {
    /// Fingerprints a buffer
    pub fn content(bytes: &[u8]) -> Self {
        SourceId::Content(blake3::hash(bytes).to_hex().to_string())
    }

    /// Canonicalizes a path, failing if it does not exist
    pub fn path(path: &Path) -> Result<Self> {
        path.canonicalize()
            .map(SourceId::Path)
            .map_err(|e| Error::source_unavailable(path.display().to_string(), e))
    }

    /// Identity of any source
    pub fn of(source: &Source) -> Result<Self> {
        match source {
            Source::Bytes(bytes) => Ok(SourceId::content(bytes)),
            Source::Path(path) => SourceId::path(path),
            Source::Url(url) => Ok(SourceId::Url(url.clone())),
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Path(path) => write!(f, "{}", path.display()),
            SourceId::Url(url) => f.write_str(url),
            SourceId::Content(hash) => write!(f, "blake3:{}", &hash[..hash.len().min(16)]),
            SourceId::Composite(parts) => {
                f.write_str("[")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", part)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Opens URL sources.
///
/// The loader never performs network I/O itself; a locator decides which
/// schemes it understands and how to fetch them.
pub trait Locator: fmt::Debug + Send + Sync {
    /// Returns the complete contents behind `url`
    fn open(&self, url: &str) -> Result<Bytes>;
}

/// Reads a file, refusing anything larger than `limit` bytes.
///
/// The size is checked before reading and the read itself stops one byte
/// past the limit, so a file that grows in between is still rejected.
pub(crate) fn read_file(path: &Path, identity: &str, limit: usize) -> Result<Bytes> {
    let file = File::open(path).map_err(|e| Error::source_unavailable(identity, e))?;
    let too_large = |size: usize| Error::SourceTooLarge {
        identity: identity.to_string(),
        size,
        limit,
    };

    if let Ok(metadata) = file.metadata() {
        let size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if size > limit {
            return Err(too_large(size));
        }
    }

    let mut buffer = Vec::new();
    file.take((limit as u64).saturating_add(1))
        .read_to_end(&mut buffer)
        .map_err(|e| Error::source_unavailable(identity, e))?;
    if buffer.len() > limit {
        return Err(too_large(buffer.len()));
    }
    Ok(Bytes::from(buffer))
}

/// Locator serving `file://` URLs from the local filesystem
#[derive(Debug, Clone, Copy)]
pub struct FileUrlLocator {
    max_size: usize,
}

impl Default for FileUrlLocator {
    fn default() -> Self {
        Self {
            max_size: usize::MAX,
        }
    }
}

impl FileUrlLocator {
    /// Creates a locator without a size limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a locator that refuses files larger than `max_size` bytes
    pub fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl Locator for FileUrlLocator {
    fn open(&self, url: &str) -> Result<Bytes> {
        let invalid = |kind: io::ErrorKind, message: String| {
            Error::source_unavailable(url, io::Error::new(kind, message))
        };

        let parsed = Url::parse(url)
            .map_err(|e| invalid(io::ErrorKind::InvalidInput, format!("invalid URL: {}", e)))?;
        if parsed.scheme() != "file" {
            return Err(invalid(
                io::ErrorKind::Unsupported,
                format!("unsupported scheme '{}', only file:// URLs are served", parsed.scheme()),
            ));
        }
        let path = parsed.to_file_path().map_err(|_| {
            invalid(
                io::ErrorKind::InvalidInput,
                "URL does not name a local file".to_string(),
            )
        })?;

        read_file(&path, url, self.max_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_content_identity_is_stable() {
        let a = SourceId::content(b"abc");
        assert_eq!(a, SourceId::content(b"abc"));
        assert_ne!(a, SourceId::content(b"abd"));
        assert!(a.to_string().starts_with("blake3:"));
    }

    #[test]
    fn test_path_identity_is_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("set.pb");
        std::fs::write(&file, b"").unwrap();

        let dotted = dir.path().join(".").join("set.pb");
        assert_eq!(SourceId::path(&file).unwrap(), SourceId::path(&dotted).unwrap());

        let missing = SourceId::path(&dir.path().join("missing.pb")).unwrap_err();
        assert!(missing.is_source_error());
    }

    #[test]
    fn test_file_url_locator() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\x0a\x00").unwrap();
        let url = Url::from_file_path(file.path()).unwrap();

        let bytes = FileUrlLocator::new().open(url.as_str()).unwrap();
        assert_eq!(&bytes[..], b"\x0a\x00");

        let err = FileUrlLocator::new().open("https://example.com/set.pb").unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
        let err = FileUrlLocator::new().open("not a url").unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
    }

    #[test]
    fn test_file_url_is_percent_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("my set.pb");
        std::fs::write(&file, b"\x0a\x00").unwrap();

        let url = Url::from_file_path(&file).unwrap();
        assert!(url.as_str().ends_with("/my%20set.pb"), "{}", url);
        let bytes = FileUrlLocator::new().open(url.as_str()).unwrap();
        assert_eq!(&bytes[..], b"\x0a\x00");
    }

    #[test]
    fn test_file_url_respects_size_limit() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 32]).unwrap();
        let url = Url::from_file_path(file.path()).unwrap();

        let err = FileUrlLocator::with_max_size(16).open(url.as_str()).unwrap_err();
        assert!(matches!(err, Error::SourceTooLarge { size: 32, limit: 16, .. }));
        assert!(FileUrlLocator::with_max_size(32).open(url.as_str()).is_ok());
    }

    #[test]
    fn test_read_file_stops_at_limit() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 10]).unwrap();

        let err = read_file(file.path(), "set", 9).unwrap_err();
        assert!(matches!(err, Error::SourceTooLarge { limit: 9, .. }));
        assert_eq!(read_file(file.path(), "set", 10).unwrap().len(), 10);
    }
}
