//! TIFF tag value reading.
//!
//! Values can be stored either inline in the IFD entry (for small values) or
//! at an offset in the file (for larger values like arrays). Array values
//! (TileOffsets, TileByteCounts) are fetched in a single positioned read.

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::FieldType;

/// Reads tag values from a TIFF file, respecting the file's byte order.
pub struct ValueReader<'a, R: RangeReader> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Read raw bytes for an IFD entry's value: from the entry itself if
    /// inline, otherwise a positioned read at its offset.
    pub fn read_bytes(&self, entry: &IfdEntry) -> Result<Vec<u8>, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            Ok(entry.value_offset_bytes[..size as usize].to_vec())
        } else {
            let offset = entry.value_offset(self.header.byte_order);
            Ok(self.reader.read_exact_at(offset, size as usize)?)
        }
    }

    /// Read a single u32 value from an entry (Short or Long).
    pub fn read_u32(&self, entry: &IfdEntry) -> Result<u32, TiffError> {
        if let Some(value) = entry.inline_u32(self.header.byte_order) {
            return Ok(value);
        }

        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.count != 1 {
            return Err(TiffError::InvalidTagValue {
                tag: "unknown",
                message: format!("expected count 1, got {}", entry.count),
            });
        }

        let bytes = self.read_bytes(entry)?;
        let byte_order = self.header.byte_order;

        match field_type {
            FieldType::Short => Ok(byte_order.read_u16(&bytes) as u32),
            FieldType::Long => Ok(byte_order.read_u32(&bytes)),
            _ => Err(TiffError::InvalidTagValue {
                tag: "unknown",
                message: format!("expected Short or Long, got {:?}", field_type),
            }),
        }
    }

    /// Read a single u64 value from an entry (Short, Long, or Long8).
    pub fn read_u64(&self, entry: &IfdEntry) -> Result<u64, TiffError> {
        if let Some(value) = entry.inline_u64(self.header.byte_order) {
            return Ok(value);
        }

        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.count != 1 {
            return Err(TiffError::InvalidTagValue {
                tag: "unknown",
                message: format!("expected count 1, got {}", entry.count),
            });
        }

        let bytes = self.read_bytes(entry)?;
        let byte_order = self.header.byte_order;

        match field_type {
            FieldType::Short => Ok(byte_order.read_u16(&bytes) as u64),
            FieldType::Long => Ok(byte_order.read_u32(&bytes) as u64),
            FieldType::Long8 => Ok(byte_order.read_u64(&bytes)),
            _ => Err(TiffError::InvalidTagValue {
                tag: "unknown",
                message: format!("expected Short, Long, or Long8, got {:?}", field_type),
            }),
        }
    }

    /// Read an array of u64 values from an entry, the primary way of reading
    /// TileOffsets/TileByteCounts (Short, Long, or Long8, widened to u64).
    pub fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        let count = entry.count as usize;
        if count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry)?;
        let byte_order = self.header.byte_order;
        let mut values = Vec::with_capacity(count);

        match field_type {
            FieldType::Short => {
                for i in 0..count {
                    values.push(byte_order.read_u16(&bytes[i * 2..]) as u64);
                }
            }
            FieldType::Long => {
                for i in 0..count {
                    values.push(byte_order.read_u32(&bytes[i * 4..]) as u64);
                }
            }
            FieldType::Long8 => {
                for i in 0..count {
                    values.push(byte_order.read_u64(&bytes[i * 8..]));
                }
            }
            _ => {
                return Err(TiffError::InvalidTagValue {
                    tag: "unknown",
                    message: format!("expected Short, Long, or Long8 for array, got {:?}", field_type),
                });
            }
        }

        Ok(values)
    }

    /// Read an array of u32 values from an entry (Short or Long).
    pub fn read_u32_array(&self, entry: &IfdEntry) -> Result<Vec<u32>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        let count = entry.count as usize;
        if count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry)?;
        let byte_order = self.header.byte_order;
        let mut values = Vec::with_capacity(count);

        match field_type {
            FieldType::Short => {
                for i in 0..count {
                    values.push(byte_order.read_u16(&bytes[i * 2..]) as u32);
                }
            }
            FieldType::Long => {
                for i in 0..count {
                    values.push(byte_order.read_u32(&bytes[i * 4..]));
                }
            }
            _ => {
                return Err(TiffError::InvalidTagValue {
                    tag: "unknown",
                    message: format!("expected Short or Long for u32 array, got {:?}", field_type),
                });
            }
        }

        Ok(values)
    }

    /// Read a null-terminated ASCII string value from an entry.
    pub fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if field_type != FieldType::Ascii {
            return Err(TiffError::InvalidTagValue {
                tag: "unknown",
                message: format!("expected Ascii type for string, got {:?}", field_type),
            });
        }

        let bytes = self.read_bytes(entry)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Read raw bytes from an entry (UNDEFINED type), used for JPEGTables.
    pub fn read_raw_bytes(&self, entry: &IfdEntry) -> Result<Vec<u8>, TiffError> {
        self.read_bytes(entry)
    }
}

/// Parse an array of u64 values from raw bytes already in hand.
pub fn parse_u64_array(bytes: &[u8], count: usize, field_type: FieldType, byte_order: ByteOrder) -> Vec<u64> {
    let mut values = Vec::with_capacity(count);
    match field_type {
        FieldType::Short => {
            for i in 0..count {
                let offset = i * 2;
                if offset + 2 <= bytes.len() {
                    values.push(byte_order.read_u16(&bytes[offset..]) as u64);
                }
            }
        }
        FieldType::Long => {
            for i in 0..count {
                let offset = i * 4;
                if offset + 4 <= bytes.len() {
                    values.push(byte_order.read_u32(&bytes[offset..]) as u64);
                }
            }
        }
        FieldType::Long8 => {
            for i in 0..count {
                let offset = i * 8;
                if offset + 8 <= bytes.len() {
                    values.push(byte_order.read_u64(&bytes[offset..]));
                }
            }
        }
        _ => {}
    }
    values
}

/// Parse an array of u32 values from raw bytes already in hand.
pub fn parse_u32_array(bytes: &[u8], count: usize, field_type: FieldType, byte_order: ByteOrder) -> Vec<u32> {
    let mut values = Vec::with_capacity(count);
    match field_type {
        FieldType::Short => {
            for i in 0..count {
                let offset = i * 2;
                if offset + 2 <= bytes.len() {
                    values.push(byte_order.read_u16(&bytes[offset..]) as u32);
                }
            }
        }
        FieldType::Long => {
            for i in 0..count {
                let offset = i * 4;
                if offset + 4 <= bytes.len() {
                    values.push(byte_order.read_u32(&bytes[offset..]));
                }
            }
        }
        _ => {}
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IoError;

    struct MockReader {
        data: Vec<u8>,
    }

    impl MockReader {
        fn new(data: Vec<u8>) -> Self {
            Self { data }
        }
    }

    impl RangeReader for MockReader {
        fn read_exact_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError> {
            let start = offset as usize;
            let end = start + len;
            if end > self.data.len() {
                return Err(IoError::RangeOutOfBounds {
                    offset,
                    requested: len as u64,
                    size: self.data.len() as u64,
                });
            }
            Ok(self.data[start..end].to_vec())
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn identifier(&self) -> &str {
            "mock://test"
        }
    }

    fn make_tiff_header() -> TiffHeader {
        TiffHeader {
            byte_order: ByteOrder::LittleEndian,
            is_bigtiff: false,
            first_ifd_offset: 8,
        }
    }

    #[test]
    fn test_parse_u64_array_short() {
        let bytes = [0x64, 0x00, 0xC8, 0x00, 0x2C, 0x01, 0x90, 0x01];
        let result = parse_u64_array(&bytes, 4, FieldType::Short, ByteOrder::LittleEndian);
        assert_eq!(result, vec![100, 200, 300, 400]);
    }

    #[test]
    fn test_parse_u64_array_long8() {
        let bytes = [
            0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00,
        ];
        let result = parse_u64_array(&bytes, 2, FieldType::Long8, ByteOrder::LittleEndian);
        assert_eq!(result, vec![0x0000_0001_0000_0000, 0x0000_0002_0000_0000]);
    }

    #[test]
    fn test_parse_u32_array() {
        let bytes = [0x00, 0x01, 0x00, 0x02];
        let result = parse_u32_array(&bytes, 2, FieldType::Short, ByteOrder::LittleEndian);
        assert_eq!(result, vec![256, 512]);
    }

    #[test]
    fn test_value_reader_read_bytes_inline() {
        let reader = MockReader::new(vec![0; 100]);
        let header = make_tiff_header();
        let value_reader = ValueReader::new(&reader, &header);

        let entry = IfdEntry {
            tag_id: 256,
            field_type: Some(FieldType::Short),
            field_type_raw: 3,
            count: 1,
            value_offset_bytes: vec![0x00, 0x04, 0x00, 0x00],
            is_inline: true,
        };

        let bytes = value_reader.read_bytes(&entry).unwrap();
        assert_eq!(&bytes[..], &[0x00, 0x04]);
    }

    #[test]
    fn test_value_reader_read_bytes_offset() {
        let mut data = vec![0u8; 100];
        data[50] = 0xAB;
        data[51] = 0xCD;
        data[52] = 0xEF;
        data[53] = 0x12;

        let reader = MockReader::new(data);
        let header = make_tiff_header();
        let value_reader = ValueReader::new(&reader, &header);

        let entry = IfdEntry {
            tag_id: 256,
            field_type: Some(FieldType::Long),
            field_type_raw: 4,
            count: 1,
            value_offset_bytes: vec![0x32, 0x00, 0x00, 0x00],
            is_inline: false,
        };

        let bytes = value_reader.read_bytes(&entry).unwrap();
        assert_eq!(&bytes[..], &[0xAB, 0xCD, 0xEF, 0x12]);
    }

    #[test]
    fn test_value_reader_read_u64_array() {
        let mut data = vec![0u8; 200];
        let offsets: [u32; 5] = [1000, 2000, 3000, 4000, 5000];
        for (i, &val) in offsets.iter().enumerate() {
            let pos = 100 + i * 4;
            data[pos..pos + 4].copy_from_slice(&val.to_le_bytes());
        }

        let reader = MockReader::new(data);
        let header = make_tiff_header();
        let value_reader = ValueReader::new(&reader, &header);

        let entry = IfdEntry {
            tag_id: 324,
            field_type: Some(FieldType::Long),
            field_type_raw: 4,
            count: 5,
            value_offset_bytes: vec![0x64, 0x00, 0x00, 0x00],
            is_inline: false,
        };

        let result = value_reader.read_u64_array(&entry).unwrap();
        assert_eq!(result, vec![1000, 2000, 3000, 4000, 5000]);
    }

    #[test]
    fn test_value_reader_read_string() {
        let mut data = vec![0u8; 100];
        let desc = b"Aperio Image\0";
        data[20..20 + desc.len()].copy_from_slice(desc);

        let reader = MockReader::new(data);
        let header = make_tiff_header();
        let value_reader = ValueReader::new(&reader, &header);

        let entry = IfdEntry {
            tag_id: 270,
            field_type: Some(FieldType::Ascii),
            field_type_raw: 2,
            count: desc.len() as u64,
            value_offset_bytes: vec![0x14, 0x00, 0x00, 0x00],
            is_inline: false,
        };

        let result = value_reader.read_string(&entry).unwrap();
        assert_eq!(result, "Aperio Image");
    }

    #[test]
    fn test_value_reader_read_raw_bytes() {
        let mut data = vec![0u8; 100];
        data[30] = 0xFF;
        data[31] = 0xD8;
        data[32] = 0xFF;
        data[33] = 0xDB;
        data[34] = 0xFF;
        data[35] = 0xD9;

        let reader = MockReader::new(data);
        let header = make_tiff_header();
        let value_reader = ValueReader::new(&reader, &header);

        let entry = IfdEntry {
            tag_id: 347,
            field_type: Some(FieldType::Undefined),
            field_type_raw: 7,
            count: 6,
            value_offset_bytes: vec![0x1E, 0x00, 0x00, 0x00],
            is_inline: false,
        };

        let result = value_reader.read_raw_bytes(&entry).unwrap();
        assert_eq!(&result[..], &[0xFF, 0xD8, 0xFF, 0xDB, 0xFF, 0xD9]);
    }

    #[test]
    fn test_value_reader_inline_u32() {
        let reader = MockReader::new(vec![0; 100]);
        let header = make_tiff_header();
        let value_reader = ValueReader::new(&reader, &header);

        let entry = IfdEntry {
            tag_id: 256,
            field_type: Some(FieldType::Long),
            field_type_raw: 4,
            count: 1,
            value_offset_bytes: vec![0x50, 0xC3, 0x00, 0x00],
            is_inline: true,
        };

        let result = value_reader.read_u32(&entry).unwrap();
        assert_eq!(result, 50000);
    }

    #[test]
    fn test_value_reader_error_unknown_type() {
        let reader = MockReader::new(vec![0; 100]);
        let header = make_tiff_header();
        let value_reader = ValueReader::new(&reader, &header);

        let entry = IfdEntry {
            tag_id: 256,
            field_type: None,
            field_type_raw: 99,
            count: 1,
            value_offset_bytes: vec![0x00, 0x00, 0x00, 0x00],
            is_inline: false,
        };

        let result = value_reader.read_bytes(&entry);
        assert!(matches!(result, Err(TiffError::UnknownFieldType(99))));
    }
}
