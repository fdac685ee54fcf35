//! Positioned byte-range reads over a backing file.
//!
//! `RangeReader` is the abstraction the TIFF parser and per-format executors
//! read through. The only implementation in this crate is
//! [`LocalFileReader`], since network/object storage is out of scope; the
//! trait boundary is kept so the parser itself stays free of any
//! `std::fs::File`-specific code.

use std::fs::File;
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::IoError;

/// Read a contiguous byte range from a backing resource.
///
/// Implementations must be thread-safe: the per-file-per-thread handle pool
/// in the format executors may call `read_exact_at` from many threads
/// concurrently.
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError>;

    /// Total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Identifier for logging and cache keys (the file path, for local files).
    fn identifier(&self) -> &str;
}

/// A `RangeReader` backed by one open local file handle.
///
/// Positioned reads use `pread` (via [`FileExt::read_exact_at`]) so no
/// shared seek cursor needs locking; the surrounding mutex exists only to
/// make `&self` reads sound across `std::fs::File`'s platform-specific
/// `Read`/`Seek`-only fallback path, which is not used on Unix.
pub struct LocalFileReader {
    file: File,
    size: u64,
    path: String,
}

impl LocalFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| IoError::Os {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let size = file
            .metadata()
            .map_err(|e| IoError::Os {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
            .len();
        Ok(Self {
            file,
            size,
            path: path.display().to_string(),
        })
    }
}

impl RangeReader for LocalFileReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError> {
        if offset.saturating_add(len as u64) > self.size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }
        let mut buf = vec![0u8; len];
        self.file.read_exact_at(&mut buf, offset).map_err(|e| IoError::Os {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        Ok(buf)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.path
    }
}

/// Fallback `RangeReader` over any `Read + Seek`, used in tests where a
/// cursor-backed in-memory buffer is more convenient than a temp file.
pub struct CursorReader<R> {
    inner: Mutex<R>,
    size: u64,
    identifier: String,
}

impl<R: Read + std::io::Seek> CursorReader<R> {
    pub fn new(inner: R, size: u64, identifier: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(inner),
            size,
            identifier: identifier.into(),
        }
    }
}

impl<R: Read + std::io::Seek + Send> RangeReader for CursorReader<R> {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError> {
        if offset.saturating_add(len as u64) > self.size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }
        let mut guard = self.inner.lock().expect("cursor reader mutex poisoned");
        guard
            .seek(std::io::SeekFrom::Start(offset))
            .map_err(|e| IoError::Os {
                path: self.identifier.clone(),
                message: e.to_string(),
            })?;
        let mut buf = vec![0u8; len];
        guard.read_exact(&mut buf).map_err(|e| IoError::Os {
            path: self.identifier.clone(),
            message: e.to_string(),
        })?;
        Ok(buf)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Read a little-endian u16 from a byte slice.
#[inline]
pub fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Read a big-endian u16 from a byte slice.
#[inline]
pub fn read_u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

/// Read a little-endian u32 from a byte slice.
#[inline]
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a big-endian u32 from a byte slice.
#[inline]
pub fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian u64 from a byte slice.
#[inline]
pub fn read_u64_le(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Read a big-endian u64 from a byte slice.
#[inline]
pub fn read_u64_be(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_u16_le() {
        assert_eq!(read_u16_le(&[0x02, 0x01]), 0x0102);
    }

    #[test]
    fn test_read_u32_be() {
        assert_eq!(read_u32_be(&[0x01, 0x02, 0x03, 0x04]), 0x01020304);
    }

    #[test]
    fn test_read_u64_le() {
        assert_eq!(
            read_u64_le(&[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]),
            0x0102030405060708
        );
    }

    #[test]
    fn local_file_reader_reads_exact_range() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        tmp.flush().unwrap();
        let reader = LocalFileReader::open(tmp.path()).unwrap();
        assert_eq!(reader.size(), 10);
        assert_eq!(reader.read_exact_at(2, 4).unwrap(), b"2345");
    }

    #[test]
    fn local_file_reader_rejects_out_of_bounds_range() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello").unwrap();
        tmp.flush().unwrap();
        let reader = LocalFileReader::open(tmp.path()).unwrap();
        assert!(matches!(
            reader.read_exact_at(3, 10),
            Err(IoError::RangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn cursor_reader_reads_exact_range() {
        let data = b"abcdefghij".to_vec();
        let size = data.len() as u64;
        let reader = CursorReader::new(std::io::Cursor::new(data), size, "mem");
        assert_eq!(reader.read_exact_at(3, 3).unwrap(), b"def");
    }
}
