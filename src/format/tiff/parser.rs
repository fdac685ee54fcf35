//! TIFF header and structure parsing.
//!
//! This module handles parsing of TIFF and BigTIFF file headers,
//! which is the foundation for all subsequent parsing operations.
//!
//! # TIFF Header Structure
//!
//! ## Classic TIFF (8 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (42 = 0x002A)
//! Bytes 4-7: Offset to first IFD (4 bytes)
//! ```
//!
//! ## BigTIFF (16 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (43 = 0x002B)
//! Bytes 4-5: Offset byte size (must be 8)
//! Bytes 6-7: Reserved (must be 0)
//! Bytes 8-15: Offset to first IFD (8 bytes)
//! ```

use std::collections::HashMap;

use crate::error::TiffError;
use crate::io::{read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le};

use super::tags::{FieldType, TiffTag};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes indicating little-endian byte order ("II" for Intel)
const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;

/// Magic bytes indicating big-endian byte order ("MM" for Motorola)
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;

/// Version number for classic TIFF
const VERSION_TIFF: u16 = 42;

/// Version number for BigTIFF
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) of a TIFF file.
///
/// TIFF files declare their byte order in the first two bytes of the header.
/// All multi-byte values in the file must be read respecting this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

impl ByteOrder {
    /// Read a u16 from a byte slice using this byte order.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => read_u16_le(bytes),
            ByteOrder::BigEndian => read_u16_be(bytes),
        }
    }

    /// Read a u32 from a byte slice using this byte order.
    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    /// Read a u64 from a byte slice using this byte order.
    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => read_u64_be(bytes),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
///
/// Contains the essential information needed to begin parsing IFDs:
/// - Byte order for reading all subsequent values
/// - Whether this is classic TIFF or BigTIFF (affects entry sizes and offset widths)
/// - Location of the first IFD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Whether this is a BigTIFF file (64-bit offsets)
    pub is_bigtiff: bool,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a TIFF header from raw bytes.
    ///
    /// The input must contain at least 8 bytes for classic TIFF or 16 bytes for BigTIFF.
    /// The function first reads enough to determine the format, then validates the rest.
    ///
    /// # Arguments
    /// * `bytes` - Raw header bytes (at least 8 bytes, preferably 16 for BigTIFF support)
    /// * `file_size` - Total file size (used to validate IFD offset)
    ///
    /// # Errors
    /// - `InvalidMagic` if byte order bytes are not II or MM
    /// - `InvalidVersion` if version is not 42 or 43
    /// - `InvalidBigTiffOffsetSize` if BigTIFF offset size is not 8
    /// - `FileTooSmall` if there aren't enough bytes for the header
    /// - `InvalidIfdOffset` if the first IFD offset is outside the file
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        // Need at least 8 bytes to read the basic header
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        // Read byte order (bytes 0-1)
        // We read this as little-endian because we're checking for specific byte patterns
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        // Read version (bytes 2-3) using the detected byte order
        let version = byte_order.read_u16(&bytes[2..4]);

        match version {
            VERSION_TIFF => {
                // Classic TIFF: 4-byte offset at bytes 4-7
                let first_ifd_offset = byte_order.read_u32(&bytes[4..8]) as u64;

                // Validate offset
                if first_ifd_offset >= file_size {
                    return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
                }

                Ok(TiffHeader {
                    byte_order,
                    is_bigtiff: false,
                    first_ifd_offset,
                })
            }
            VERSION_BIGTIFF => {
                // BigTIFF: need 16 bytes total
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }

                // Bytes 4-5: offset byte size (must be 8)
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }

                // Bytes 6-7: reserved (should be 0, but we don't strictly require it)

                // Bytes 8-15: first IFD offset (8 bytes)
                let first_ifd_offset = byte_order.read_u64(&bytes[8..16]);

                // Validate offset
                if first_ifd_offset >= file_size {
                    return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
                }

                Ok(TiffHeader {
                    byte_order,
                    is_bigtiff: true,
                    first_ifd_offset,
                })
            }
            _ => Err(TiffError::InvalidVersion(version)),
        }
    }

    /// Size of an IFD entry in bytes.
    ///
    /// Classic TIFF: 12 bytes (2 tag + 2 type + 4 count + 4 value/offset)
    /// BigTIFF: 20 bytes (2 tag + 2 type + 8 count + 8 value/offset)
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry count field at the start of an IFD.
    ///
    /// Classic TIFF: 2 bytes (u16)
    /// BigTIFF: 8 bytes (u64)
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of the next IFD offset field at the end of an IFD.
    ///
    /// Classic TIFF: 4 bytes (u32)
    /// BigTIFF: 8 bytes (u64)
    #[inline]
    pub const fn ifd_next_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Size of the value/offset field in an IFD entry.
    ///
    /// This determines the inline value threshold:
    /// Classic TIFF: 4 bytes
    /// BigTIFF: 8 bytes
    #[inline]
    pub const fn value_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }
}

// =============================================================================
// IfdEntry
// =============================================================================

/// One 12-byte (classic TIFF) or 20-byte (BigTIFF) directory entry.
///
/// `value_offset_bytes` holds the entry's value/offset field exactly as
/// stored on disk (4 bytes for classic TIFF, 8 for BigTIFF): the value
/// itself when `is_inline`, otherwise the file offset where the value
/// lives.
#[derive(Debug, Clone)]
pub struct IfdEntry {
    pub tag_id: u16,
    pub field_type: Option<FieldType>,
    pub field_type_raw: u16,
    pub count: u64,
    pub value_offset_bytes: Vec<u8>,
    pub is_inline: bool,
}

impl IfdEntry {
    /// Total byte size of this entry's value, or `None` for an unrecognized field type.
    #[inline]
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type.map(|ft| ft.size_in_bytes() as u64 * self.count)
    }

    /// The file offset where this entry's value is stored.
    ///
    /// Only meaningful when `is_inline` is `false`; reads the raw
    /// value/offset field as a 32- or 64-bit integer depending on its width.
    pub fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        if self.value_offset_bytes.len() >= 8 {
            byte_order.read_u64(&self.value_offset_bytes)
        } else {
            byte_order.read_u32(&self.value_offset_bytes) as u64
        }
    }

    /// Inline u32 value, if this entry holds a single inline Short or Long.
    pub fn inline_u32(&self, byte_order: ByteOrder) -> Option<u32> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        match self.field_type? {
            FieldType::Short => Some(byte_order.read_u16(&self.value_offset_bytes) as u32),
            FieldType::Long => Some(byte_order.read_u32(&self.value_offset_bytes)),
            _ => None,
        }
    }

    /// Inline u64 value, if this entry holds a single inline Short, Long, or Long8.
    pub fn inline_u64(&self, byte_order: ByteOrder) -> Option<u64> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        match self.field_type? {
            FieldType::Short => Some(byte_order.read_u16(&self.value_offset_bytes) as u64),
            FieldType::Long => Some(byte_order.read_u32(&self.value_offset_bytes) as u64),
            FieldType::Long8 => Some(byte_order.read_u64(&self.value_offset_bytes)),
            _ => None,
        }
    }

    fn parse(bytes: &[u8], header: &TiffHeader) -> Self {
        let byte_order = header.byte_order;
        let tag_id = byte_order.read_u16(&bytes[0..2]);
        let field_type_raw = byte_order.read_u16(&bytes[2..4]);
        let field_type = FieldType::from_u16(field_type_raw);

        let value_start;
        let count;
        if header.is_bigtiff {
            count = byte_order.read_u64(&bytes[4..12]);
            value_start = 12;
        } else {
            count = byte_order.read_u32(&bytes[4..8]) as u64;
            value_start = 8;
        }

        let value_size = header.value_offset_size();
        let value_offset_bytes = bytes[value_start..value_start + value_size].to_vec();
        let is_inline = field_type
            .map(|ft| ft.fits_inline(count, header.is_bigtiff))
            .unwrap_or(false);

        IfdEntry {
            tag_id,
            field_type,
            field_type_raw,
            count,
            value_offset_bytes,
            is_inline,
        }
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed Image File Directory: a flat list of tag/value entries plus the
/// offset of the next IFD in the chain (0 terminates the chain).
#[derive(Debug, Clone)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    pub entries_by_tag: HashMap<u16, usize>,
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// An IFD with no entries, for synthetic/test use.
    pub fn empty() -> Self {
        Ifd {
            entries: Vec::new(),
            entries_by_tag: HashMap::new(),
            next_ifd_offset: 0,
        }
    }

    /// Total byte size of an IFD with `entry_count` entries: the leading
    /// entry-count field, each fixed-size entry, and the trailing
    /// next-IFD-offset field.
    pub fn calculate_size(entry_count: u64, header: &TiffHeader) -> usize {
        header.ifd_count_size()
            + entry_count as usize * header.ifd_entry_size()
            + header.ifd_next_offset_size()
    }

    /// Parse an IFD from bytes at the start of its entry-count field.
    ///
    /// `bytes` must be at least [`Ifd::calculate_size`] long for the entry
    /// count it declares.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let count_size = header.ifd_count_size();
        if bytes.len() < count_size {
            return Err(TiffError::FileTooSmall {
                required: count_size as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_count = if header.is_bigtiff {
            header.byte_order.read_u64(&bytes[0..8])
        } else {
            header.byte_order.read_u16(&bytes[0..2]) as u64
        };

        let total_size = Ifd::calculate_size(entry_count, header);
        if bytes.len() < total_size {
            return Err(TiffError::FileTooSmall {
                required: total_size as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_size = header.ifd_entry_size();
        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut entries_by_tag = HashMap::with_capacity(entry_count as usize);

        for i in 0..entry_count as usize {
            let start = count_size + i * entry_size;
            let entry = IfdEntry::parse(&bytes[start..start + entry_size], header);
            entries_by_tag.insert(entry.tag_id, entries.len());
            entries.push(entry);
        }

        let next_offset_start = count_size + entry_count as usize * entry_size;
        let next_ifd_offset = if header.is_bigtiff {
            header.byte_order.read_u64(&bytes[next_offset_start..next_offset_start + 8])
        } else {
            header.byte_order.read_u32(&bytes[next_offset_start..next_offset_start + 4]) as u64
        };

        Ok(Ifd {
            entries,
            entries_by_tag,
            next_ifd_offset,
        })
    }

    /// Look up an entry by its tag, if present.
    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.entries_by_tag
            .get(&tag.as_u16())
            .map(|&idx| &self.entries[idx])
    }

    fn inline_or_array_u32(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u32> {
        let entry = self.get_entry_by_tag(tag)?;
        entry.inline_u32(byte_order)
    }

    /// Tile width (tag 322), if present and inline.
    pub fn tile_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_or_array_u32(TiffTag::TileWidth, byte_order)
    }

    /// Tile height (tag 323), if present and inline.
    pub fn tile_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_or_array_u32(TiffTag::TileLength, byte_order)
    }

    /// Image width (tag 256), if present and inline.
    pub fn image_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_or_array_u32(TiffTag::ImageWidth, byte_order)
    }

    /// Image height (tag 257), if present and inline.
    pub fn image_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_or_array_u32(TiffTag::ImageLength, byte_order)
    }

    /// Compression scheme value (tag 259), if present and inline.
    pub fn compression(&self, byte_order: ByteOrder) -> Option<u16> {
        self.inline_or_array_u32(TiffTag::Compression, byte_order)
            .map(|v| v as u16)
    }

    /// Whether this IFD carries tile tags (TileWidth/TileLength/TileOffsets/TileByteCounts).
    pub fn is_tiled(&self) -> bool {
        self.get_entry_by_tag(TiffTag::TileWidth).is_some()
            && self.get_entry_by_tag(TiffTag::TileLength).is_some()
            && self.get_entry_by_tag(TiffTag::TileOffsets).is_some()
            && self.get_entry_by_tag(TiffTag::TileByteCounts).is_some()
    }

    /// Whether this IFD carries strip tags (StripOffsets/StripByteCounts).
    pub fn is_stripped(&self) -> bool {
        self.get_entry_by_tag(TiffTag::StripOffsets).is_some()
            && self.get_entry_by_tag(TiffTag::StripByteCounts).is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================
