use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scatterzip_core::{
    CompressionLevel, EntryRequest, MemoryStoreFactory, ScatterWriter, WriterConfig,
    ZipArchiveSink,
};

const ENTRY_COUNT: usize = 256;
const ENTRY_SIZE: usize = 32 * 1024;

fn synthetic_entry(rng: &mut StdRng) -> Vec<u8> {
    // Mostly repetitive text with a sprinkling of noise.
    (0..ENTRY_SIZE)
        .map(|offset| {
            if offset % 17 == 0 {
                rng.r#gen::<u8>()
            } else {
                b"lorem ipsum dolor sit amet "[offset % 27]
            }
        })
        .collect()
}

fn write_archive(entries: &[Vec<u8>], workers: usize) -> usize {
    let config = WriterConfig::new(workers, CompressionLevel::Level(6));
    let mut writer =
        ScatterWriter::new(config, MemoryStoreFactory::new()).expect("valid bench config");
    for (index, data) in entries.iter().enumerate() {
        writer
            .submit(EntryRequest::from_bytes(format!("{index}.txt"), data.clone()))
            .expect("submit while open");
    }
    let mut sink = ZipArchiveSink::new(Vec::with_capacity(entries.len() * ENTRY_SIZE / 2));
    writer.write_to(&mut sink).expect("bench write");
    sink.into_inner().len()
}

fn bench_scatter_throughput(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0x5CA7_7E12);
    let entries: Vec<Vec<u8>> = (0..ENTRY_COUNT).map(|_| synthetic_entry(&mut rng)).collect();
    let max_workers = num_cpus::get().clamp(2, 8);

    let mut group = c.benchmark_group("scatter_throughput");
    group.sample_size(10);
    group.throughput(Throughput::Bytes((ENTRY_COUNT * ENTRY_SIZE) as u64));

    let mut workers = 1;
    while workers <= max_workers {
        group.bench_with_input(
            BenchmarkId::from_parameter(workers),
            &workers,
            |b, &workers| b.iter(|| black_box(write_archive(&entries, workers))),
        );
        workers *= 2;
    }

    group.finish();
}

criterion_group!(benches, bench_scatter_throughput);
criterion_main!(benches);
