use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use clap::{Parser, Subcommand};
use jwalk::WalkDir;
use scatterzip_core::{
    BackingStoreFactory, CompressionLevel, EntryMetadata, EntryRequest, EntrySource,
    MemoryStoreFactory, ScatterWriter, TempFileStoreFactory, WriteStats, WriterConfig,
    ZipArchiveSink,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "scatterzip",
    version,
    about = "Parallel ZIP writer",
    long_about = "Compress entries on a worker pool and merge them into a ZIP archive in submission order."
)]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct WriterArgs {
    /// Number of compression workers (defaults to CPU count).
    #[arg(long, default_value_t = num_cpus::get())]
    workers: usize,

    /// Deflate level 0-9, or -1 for the codec default.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    level: i32,

    /// Keep scatter buffers in memory instead of temporary files.
    #[arg(long, default_value_t = false)]
    memory: bool,

    /// Directory for temporary scatter files (defaults to the system temp dir).
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Seconds to wait for outstanding entries when finishing.
    #[arg(long, default_value_t = 60)]
    shutdown_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive every regular file under a directory.
    Archive {
        /// Source directory.
        input: PathBuf,

        /// Destination archive path (defaults to <input>.zip).
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        writer: WriterArgs,
    },
    /// Write an archive of generated entries, for throughput checks.
    Synth {
        /// Destination archive path.
        #[arg(short, long)]
        output: PathBuf,

        /// Number of generated entries.
        #[arg(long, default_value_t = 1000)]
        entries: usize,

        /// Size of each entry (supports suffixes K/M/G, e.g. 64K, 1M).
        #[arg(long, default_value = "64K", value_parser = parse_size)]
        size: usize,

        #[command(flatten)]
        writer: WriterArgs,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(error) = run(cli.command) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Archive {
            input,
            output,
            writer,
        } => archive_command(input, output, writer)?,
        Commands::Synth {
            output,
            entries,
            size,
            writer,
        } => synth_command(output, entries, size, writer)?,
    }

    Ok(())
}

fn open_writer(args: &WriterArgs) -> Result<ScatterWriter, Box<dyn std::error::Error>> {
    let config = WriterConfig::new(args.workers, CompressionLevel::from_raw(args.level)?)
        .with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout_secs));
    let factory: Arc<dyn BackingStoreFactory> = if args.memory {
        Arc::new(MemoryStoreFactory::new())
    } else {
        match &args.temp_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Arc::new(TempFileStoreFactory::in_dir(dir))
            }
            None => Arc::new(TempFileStoreFactory::new()),
        }
    };
    Ok(ScatterWriter::with_telemetry(
        config,
        factory,
        Arc::new(scatterzip_core::DefaultWorkerTelemetry),
    )?)
}

fn archive_command(
    input: PathBuf,
    output: Option<PathBuf>,
    args: WriterArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if !input.is_dir() {
        return Err(format!("{} is not a directory", input.display()).into());
    }
    let output_path = output.unwrap_or_else(|| default_output_path(&input));
    let files = discover_files(&input, &output_path)?;

    let mut writer = open_writer(&args)?;
    let mut input_bytes = 0u64;
    for file in files {
        input_bytes += file.size;
        let mut metadata = EntryMetadata::new(file.rel_path).with_modified(file.modified);
        if let Some(mode) = file.mode {
            metadata = metadata.with_unix_mode(mode);
        }
        writer.submit(EntryRequest::new(metadata, EntrySource::from_path(file.full_path)))?;
    }

    let stats = finish(&mut writer, &output_path)?;
    print_summary(&input.display().to_string(), &output_path, input_bytes, &stats);
    Ok(())
}

fn synth_command(
    output: PathBuf,
    entries: usize,
    size: usize,
    args: WriterArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = open_writer(&args)?;
    for index in 0..entries {
        writer.submit_lazy(move || {
            Ok(EntryRequest::from_bytes(
                format!("synth/{index:06}.txt"),
                synthetic_payload(index, size),
            ))
        })?;
    }

    let stats = finish(&mut writer, &output)?;
    print_summary(
        &format!("{entries} generated entries"),
        &output,
        (entries as u64) * (size as u64),
        &stats,
    );
    Ok(())
}

fn finish(
    writer: &mut ScatterWriter,
    output_path: &Path,
) -> Result<WriteStats, Box<dyn std::error::Error>> {
    let parent = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    // The archive only appears at `output_path` once it is complete.
    let staged = tempfile::Builder::new()
        .prefix(".scatterzip-")
        .suffix(".partial")
        .tempfile_in(parent)?;
    let mut sink = ZipArchiveSink::new(BufWriter::new(staged));
    let stats = writer.write_to(&mut sink)?;
    let staged = sink
        .into_inner()
        .into_inner()
        .map_err(|error| error.into_error())?;
    staged.persist(output_path)?;
    Ok(stats)
}

struct DiscoveredFile {
    rel_path: String,
    full_path: PathBuf,
    size: u64,
    modified: SystemTime,
    mode: Option<u32>,
}

fn discover_files(
    root: &Path,
    output_path: &Path,
) -> Result<Vec<DiscoveredFile>, Box<dyn std::error::Error>> {
    let started = Instant::now();
    let skip = fs::canonicalize(output_path).ok();
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let full_path = entry.path();
        if skip.is_some() && fs::canonicalize(&full_path).ok() == skip {
            continue;
        }

        let rel_path = full_path
            .strip_prefix(root)?
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let metadata = fs::metadata(&full_path)?;
        files.push(DiscoveredFile {
            rel_path,
            size: metadata.len(),
            modified: metadata.modified().unwrap_or_else(|_| SystemTime::now()),
            mode: unix_mode(&metadata),
            full_path,
        });
    }

    tracing::debug!(
        files = files.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "directory discovery complete"
    );
    Ok(files)
}

#[cfg(unix)]
fn unix_mode(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(0o100000 | (metadata.permissions().mode() & 0o7777))
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

fn synthetic_payload(index: usize, size: usize) -> Vec<u8> {
    let line = format!("entry {index:06}: the quick brown fox jumps over the lazy dog\n");
    line.as_bytes().iter().copied().cycle().take(size).collect()
}

fn print_summary(source: &str, output: &Path, input_bytes: u64, stats: &WriteStats) {
    let elapsed_secs = stats.elapsed.as_secs_f64().max(1e-6);
    let ratio = if stats.uncompressed_bytes > 0 {
        stats.compressed_bytes as f64 / stats.uncompressed_bytes as f64
    } else {
        1.0
    };

    println!("archive complete");
    println!("  source: {source}");
    println!("  output: {}", output.display());
    println!("  entries: {}", stats.entries);
    println!("  elapsed: {}", format_duration(stats.elapsed));
    println!("  input bytes: {}", format_bytes(input_bytes));
    println!("  compressed bytes: {}", format_bytes(stats.compressed_bytes));
    println!("  compression ratio: {ratio:.3}x");
    println!(
        "  throughput avg: {}/s",
        format_rate(stats.uncompressed_bytes as f64 / elapsed_secs)
    );

    let total_tasks: usize = stats.worker_task_counts.iter().sum();
    let max_tasks = stats.worker_task_counts.iter().max().copied().unwrap_or(0);
    let min_tasks = stats.worker_task_counts.iter().min().copied().unwrap_or(0);
    println!(
        "  scheduler: {} workers | task balance min/max {min_tasks}/{max_tasks} | total tasks {total_tasks}",
        stats.worker_task_counts.len()
    );
    println!(
        "  scatter buffers: created {} | released {}",
        stats.buffers_created, stats.buffers_released
    );
}

fn default_output_path(input: &Path) -> PathBuf {
    let mut out = input.as_os_str().to_os_string();
    out.push(".zip");
    PathBuf::from(out)
}

fn parse_size(value: &str) -> Result<usize, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("size cannot be empty".to_string());
    }

    let split_at = trimmed
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (num_part, suffix_part) = trimmed.split_at(split_at);
    if num_part.is_empty() {
        return Err(format!("invalid size: {value}"));
    }

    let base: usize = num_part
        .parse()
        .map_err(|_| format!("invalid size number: {value}"))?;

    let multiplier = match suffix_part.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1usize,
        "k" | "kb" => 1024usize,
        "m" | "mb" => 1024usize * 1024usize,
        "g" | "gb" => 1024usize * 1024usize * 1024usize,
        other => {
            return Err(format!("invalid size suffix '{other}' in '{value}'"));
        }
    };

    base.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: {value}"))
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

fn format_rate(bytes_per_second: f64) -> String {
    if !bytes_per_second.is_finite() || bytes_per_second <= 0.0 {
        return "0 B".to_string();
    }
    format_bytes(bytes_per_second as u64)
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let millis = duration.subsec_millis();
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;

    if minutes > 0 {
        format!("{minutes:02}:{seconds:02}")
    } else {
        format!("{seconds}.{millis:03}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes_with_suffixes() {
        assert_eq!(parse_size("512"), Ok(512));
        assert_eq!(parse_size("64K"), Ok(64 * 1024));
        assert_eq!(parse_size("2mb"), Ok(2 * 1024 * 1024));
        assert!(parse_size("").is_err());
        assert!(parse_size("12q").is_err());
    }

    #[test]
    fn synthetic_payload_has_requested_size() {
        assert_eq!(synthetic_payload(3, 1000).len(), 1000);
        assert!(synthetic_payload(0, 0).is_empty());
    }

    fn small_writer() -> ScatterWriter {
        ScatterWriter::new(
            WriterConfig::new(2, CompressionLevel::Level(1)),
            MemoryStoreFactory::new(),
        )
        .expect("valid writer config")
    }

    fn dir_listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read output dir")
            .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn finished_archive_is_published_at_output_path() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let output = dir.path().join("nested").join("out.zip");
        let mut writer = small_writer();
        writer
            .submit(EntryRequest::from_bytes("a.txt", "alpha"))
            .expect("submit while open");

        let stats = finish(&mut writer, &output).expect("write archive");
        assert_eq!(stats.entries, 1);
        assert_eq!(dir_listing(&dir.path().join("nested")), ["out.zip"]);
        assert!(fs::metadata(&output).expect("archive exists").len() > 0);
    }

    #[test]
    fn failed_write_leaves_no_output() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let output = dir.path().join("out.zip");
        let mut writer = small_writer();
        writer
            .submit(EntryRequest::from_bytes("a.txt", "alpha"))
            .expect("submit while open");
        writer
            .submit_lazy(|| Err(std::io::Error::other("unreadable input").into()))
            .expect("submit while open");

        assert!(finish(&mut writer, &output).is_err());
        assert!(!output.exists());
        assert!(dir_listing(dir.path()).is_empty());
    }

    #[test]
    fn formats_byte_counts() {
        assert_eq!(format_bytes(12), "12 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_rate(f64::NAN), "0 B");
    }
}
