//! Archive containers the gather stage can emit into.

pub mod zip;

pub use zip::{FinalSink, ZipArchiveSink};
