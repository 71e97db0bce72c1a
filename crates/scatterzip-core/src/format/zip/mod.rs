mod consts;
mod dostime;
mod headers;
mod sink;

pub use consts::{
    CENTRAL_DIRECTORY_HEADER_SIZE, CENTRAL_DIRECTORY_SIGNATURE, END_OF_CENTRAL_DIRECTORY_SIGNATURE,
    END_OF_CENTRAL_DIRECTORY_SIZE, LOCAL_FILE_HEADER_SIGNATURE, LOCAL_FILE_HEADER_SIZE,
};
pub use dostime::DosDateTime;
pub use headers::{CentralDirectoryHeader, EndOfCentralDirectory, LocalFileHeader};
pub use sink::{FinalSink, ZipArchiveSink};
