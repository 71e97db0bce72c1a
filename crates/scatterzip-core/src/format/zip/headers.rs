use crate::error::ScatterError;
use crate::types::Result;

use super::consts::{
    CENTRAL_DIRECTORY_HEADER_SIZE, CENTRAL_DIRECTORY_SIGNATURE, END_OF_CENTRAL_DIRECTORY_SIGNATURE,
    END_OF_CENTRAL_DIRECTORY_SIZE, LOCAL_FILE_HEADER_SIGNATURE, LOCAL_FILE_HEADER_SIZE,
    VERSION_NEEDED,
};
use super::dostime::DosDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub flags: u16,
    pub method: u16,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name: String,
}

impl LocalFileHeader {
    pub fn encoded_len(&self) -> usize {
        LOCAL_FILE_HEADER_SIZE + self.name.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
        bytes.extend_from_slice(&self.flags.to_le_bytes());
        bytes.extend_from_slice(&self.method.to_le_bytes());
        bytes.extend_from_slice(&self.modified.time.to_le_bytes());
        bytes.extend_from_slice(&self.modified.date.to_le_bytes());
        bytes.extend_from_slice(&self.crc32.to_le_bytes());
        bytes.extend_from_slice(&self.compressed_size.to_le_bytes());
        bytes.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        bytes.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(self.name.as_bytes());
        bytes
    }

    /// Parses a header at the start of `bytes`, returning it and its encoded length.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize)> {
        let fixed = field_slice(bytes, 0, LOCAL_FILE_HEADER_SIZE)?;
        if le_u32(fixed, 0) != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ScatterError::InvalidFormat("bad local file header signature"));
        }
        let name_len = usize::from(le_u16(fixed, 26));
        let extra_len = usize::from(le_u16(fixed, 28));
        let name = utf8(field_slice(bytes, LOCAL_FILE_HEADER_SIZE, name_len)?)?;

        let header = Self {
            flags: le_u16(fixed, 6),
            method: le_u16(fixed, 8),
            modified: DosDateTime {
                time: le_u16(fixed, 10),
                date: le_u16(fixed, 12),
            },
            crc32: le_u32(fixed, 14),
            compressed_size: le_u32(fixed, 18),
            uncompressed_size: le_u32(fixed, 22),
            name,
        };
        Ok((header, LOCAL_FILE_HEADER_SIZE + name_len + extra_len))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub flags: u16,
    pub method: u16,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub external_attributes: u32,
    pub local_header_offset: u32,
    pub name: String,
    pub comment: String,
}

impl CentralDirectoryHeader {
    pub fn encoded_len(&self) -> usize {
        CENTRAL_DIRECTORY_HEADER_SIZE + self.name.len() + self.comment.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(&CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&self.version_made_by.to_le_bytes());
        bytes.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
        bytes.extend_from_slice(&self.flags.to_le_bytes());
        bytes.extend_from_slice(&self.method.to_le_bytes());
        bytes.extend_from_slice(&self.modified.time.to_le_bytes());
        bytes.extend_from_slice(&self.modified.date.to_le_bytes());
        bytes.extend_from_slice(&self.crc32.to_le_bytes());
        bytes.extend_from_slice(&self.compressed_size.to_le_bytes());
        bytes.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        bytes.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&self.external_attributes.to_le_bytes());
        bytes.extend_from_slice(&self.local_header_offset.to_le_bytes());
        bytes.extend_from_slice(self.name.as_bytes());
        bytes.extend_from_slice(self.comment.as_bytes());
        bytes
    }

    pub fn parse(bytes: &[u8]) -> Result<(Self, usize)> {
        let fixed = field_slice(bytes, 0, CENTRAL_DIRECTORY_HEADER_SIZE)?;
        if le_u32(fixed, 0) != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(ScatterError::InvalidFormat(
                "bad central directory header signature",
            ));
        }
        let name_len = usize::from(le_u16(fixed, 28));
        let extra_len = usize::from(le_u16(fixed, 30));
        let comment_len = usize::from(le_u16(fixed, 32));
        let name = utf8(field_slice(bytes, CENTRAL_DIRECTORY_HEADER_SIZE, name_len)?)?;
        let comment_start = CENTRAL_DIRECTORY_HEADER_SIZE + name_len + extra_len;
        let comment = utf8(field_slice(bytes, comment_start, comment_len)?)?;

        let header = Self {
            version_made_by: le_u16(fixed, 4),
            flags: le_u16(fixed, 8),
            method: le_u16(fixed, 10),
            modified: DosDateTime {
                time: le_u16(fixed, 12),
                date: le_u16(fixed, 14),
            },
            crc32: le_u32(fixed, 16),
            compressed_size: le_u32(fixed, 20),
            uncompressed_size: le_u32(fixed, 24),
            external_attributes: le_u32(fixed, 38),
            local_header_offset: le_u32(fixed, 42),
            name,
            comment,
        };
        Ok((header, comment_start + comment_len))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub entries: u16,
    pub directory_size: u32,
    pub directory_offset: u32,
}

impl EndOfCentralDirectory {
    pub fn to_bytes(&self) -> [u8; END_OF_CENTRAL_DIRECTORY_SIZE] {
        let mut bytes = [0u8; END_OF_CENTRAL_DIRECTORY_SIZE];
        bytes[..4].copy_from_slice(&END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        // Disk numbers (4..8) stay zero: single-volume archive.
        bytes[8..10].copy_from_slice(&self.entries.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.entries.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.directory_size.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.directory_offset.to_le_bytes());
        bytes
    }

    /// Finds the record at the tail of a complete archive.
    pub fn locate(archive: &[u8]) -> Result<Self> {
        if archive.len() < END_OF_CENTRAL_DIRECTORY_SIZE {
            return Err(ScatterError::InvalidFormat("archive shorter than trailer"));
        }
        let signature = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();
        let last_start = archive.len() - END_OF_CENTRAL_DIRECTORY_SIZE;
        let first_start = last_start.saturating_sub(usize::from(u16::MAX));
        let start = (first_start..=last_start)
            .rev()
            .find(|&pos| archive[pos..pos + 4] == signature)
            .ok_or(ScatterError::InvalidFormat(
                "end of central directory not found",
            ))?;

        let record = &archive[start..start + END_OF_CENTRAL_DIRECTORY_SIZE];
        Ok(Self {
            entries: le_u16(record, 10),
            directory_size: le_u32(record, 12),
            directory_offset: le_u32(record, 16),
        })
    }
}

fn field_slice(bytes: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    bytes
        .get(start..start + len)
        .ok_or(ScatterError::InvalidFormat("truncated zip header"))
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ScatterError::InvalidFormat("entry name is not valid UTF-8"))
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn central_header_layout_matches_pkzip_offsets() -> Result<()> {
        let header = CentralDirectoryHeader {
            version_made_by: (3 << 8) | 20,
            flags: 0,
            method: 8,
            modified: DosDateTime::MIN,
            crc32: 0xDEAD_BEEF,
            compressed_size: 10,
            uncompressed_size: 20,
            external_attributes: 0o100644 << 16,
            local_header_offset: 1234,
            name: "xl/worksheets/sheet1.xml".to_string(),
            comment: "c".to_string(),
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), header.encoded_len());
        assert_eq!(&bytes[16..20], &0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(&bytes[42..46], &1234u32.to_le_bytes());

        let (parsed, consumed) = CentralDirectoryHeader::parse(&bytes)?;
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed, header);
        Ok(())
    }

    #[test]
    fn rejects_truncated_and_foreign_headers() {
        assert!(LocalFileHeader::parse(&[0x50, 0x4b]).is_err());
        assert!(LocalFileHeader::parse(&[0u8; 64]).is_err());
        assert!(EndOfCentralDirectory::locate(&[0u8; 40]).is_err());
    }
}
