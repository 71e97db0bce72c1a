mod support;

use proptest::prelude::*;
use scatterzip_core::{
    CompressionLevel, CompressionMethod, EntryMetadata, EntryRequest, EntrySource,
    MemoryStoreFactory, ScatterWriter, WriterConfig, ZipArchiveSink,
};
use support::{payload, read_archive};

#[derive(Debug, Clone)]
struct PlannedEntry {
    len: usize,
    stored: bool,
    lazy: bool,
}

fn planned_entry() -> impl Strategy<Value = PlannedEntry> {
    (0usize..6000, any::<bool>(), any::<bool>()).prop_map(|(len, stored, lazy)| PlannedEntry {
        len,
        stored,
        lazy,
    })
}

fn write_plan(
    plan: &[PlannedEntry],
    workers: usize,
    level: u8,
) -> Result<Vec<(String, Vec<u8>)>, Box<dyn std::error::Error>> {
    let config = WriterConfig::new(workers, CompressionLevel::Level(level));
    let mut writer = ScatterWriter::new(config, MemoryStoreFactory::new())?;

    for (index, entry) in plan.iter().enumerate() {
        let method = if entry.stored {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        let metadata = EntryMetadata::new(format!("entry-{index}")).with_method(method);
        let data = payload(index, entry.len);
        if entry.lazy {
            writer.submit_lazy(move || Ok(EntryRequest::new(metadata, EntrySource::from_bytes(data))))?;
        } else {
            writer.submit(EntryRequest::new(metadata, EntrySource::from_bytes(data)))?;
        }
    }

    let mut sink = ZipArchiveSink::new(Vec::new());
    let stats = writer.write_to(&mut sink)?;
    assert_eq!(stats.entries, plan.len());
    assert_eq!(stats.buffers_created, stats.buffers_released);

    Ok(read_archive(&sink.into_inner())?
        .into_iter()
        .map(|entry| (entry.name, entry.data))
        .collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn archive_order_matches_submission_order(
        plan in prop::collection::vec(planned_entry(), 0..48),
        workers in 1usize..6,
        level in 0u8..=9,
    ) {
        let written = write_plan(&plan, workers, level)
            .map_err(|error| TestCaseError::fail(error.to_string()))?;

        prop_assert_eq!(written.len(), plan.len());
        for (index, ((name, data), entry)) in written.iter().zip(&plan).enumerate() {
            prop_assert_eq!(name, &format!("entry-{index}"));
            prop_assert_eq!(data, &payload(index, entry.len));
        }
    }
}
