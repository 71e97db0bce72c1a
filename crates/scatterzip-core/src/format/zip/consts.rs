/// Signature of a local file header.
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
/// Signature of a central directory file header.
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
/// Signature of the end-of-central-directory record.
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;

/// Fixed part of a local file header, before the name.
pub const LOCAL_FILE_HEADER_SIZE: usize = 30;
/// Fixed part of a central directory header, before the name.
pub const CENTRAL_DIRECTORY_HEADER_SIZE: usize = 46;
/// End-of-central-directory record without comment.
pub const END_OF_CENTRAL_DIRECTORY_SIZE: usize = 22;

/// Version 2.0: deflate and directories.
pub(crate) const VERSION_NEEDED: u16 = 20;
/// Host system id for Unix in the "version made by" high byte.
pub(crate) const HOST_UNIX: u16 = 3;
/// General purpose flag bit 11: name and comment are UTF-8.
pub(crate) const FLAG_UTF8: u16 = 1 << 11;

pub(crate) const MAX_ENTRIES: usize = u16::MAX as usize;
pub(crate) const MAX_OFFSET: u64 = u32::MAX as u64;
pub(crate) const MAX_FIELD_LEN: usize = u16::MAX as usize;
