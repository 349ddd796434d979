//! hcf-squash - recompress HCF and HDF5 containers with deflate.
//!
//! Every input `<name>.<ext>` is rewritten as `compressed_<name>.<ext>` in
//! the same format, with each dataset deflate-compressed. Structure, values
//! and attributes are kept.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use hcf::{
    compare, create_destination, open_source, output_path_for, CodecConfig, ContainerFormat,
    DestinationTarget, ErrorKind, ProgressCallback, ProgressTick, ReadContainer, ShellConfig,
    SourceInput, StagedFile, Stats, TranscodeError, Transcoder,
};
use signal_hook::flag as signal_flag;
use tracing_subscriber::EnvFilter;

/// Recompress HCF and HDF5 containers with maximum deflate compression
#[derive(Parser, Debug)]
#[command(name = "hcf-squash")]
#[command(version)]
#[command(about = "Rewrite HCF and HDF5 containers with every dataset deflate-compressed")]
struct Args {
    /// Input containers (.hcf, .hcdf, .h5 or .hdf5)
    #[arg(required = true, value_name = "FILE")]
    inputs: Vec<PathBuf>,

    /// Deflate level, 1 (fastest) to 9 (smallest)
    #[arg(short, long, default_value_t = hcf::codec::DEFAULT_LEVEL,
          value_parser = clap::value_parser!(u32).range(1..=9))]
    level: u32,

    /// Store every dataset as a single chunk
    #[arg(long)]
    no_chunking: bool,

    /// Payloads larger than this many bytes are split into chunks
    #[arg(long, value_name = "BYTES")]
    chunk_threshold: Option<usize>,

    /// Approximate uncompressed size of each chunk
    #[arg(long, value_name = "BYTES")]
    target_chunk_bytes: Option<usize>,

    /// Disable the byte shuffle filter
    #[arg(long)]
    no_shuffle: bool,

    /// Write datasets uncompressed instead
    #[arg(long, conflicts_with_all = ["level", "no_shuffle"])]
    stored: bool,

    /// Read each output back and compare it with its input before it is
    /// moved into place
    #[arg(long)]
    verify: bool,

    /// Directory for outputs (default: next to each input)
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Sources larger than this many bytes are memory-mapped
    #[arg(long, value_name = "BYTES")]
    disk_threshold: Option<u64>,

    /// Print every node as it is copied and enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn shell_config(&self) -> Result<ShellConfig, hcf::Error> {
        let mut codec = if self.stored {
            CodecConfig::stored()
        } else {
            CodecConfig::default()
                .with_level(self.level)?
                .with_shuffle(!self.no_shuffle)
                .with_chunking(!self.no_chunking)
        };
        if let Some(bytes) = self.chunk_threshold {
            codec = codec.with_chunk_threshold(bytes);
        }
        if let Some(bytes) = self.target_chunk_bytes {
            codec = codec.with_target_chunk_bytes(bytes);
        }
        codec.validate()?;

        let mut config = ShellConfig::default().with_codec(codec);
        if let Some(bytes) = self.disk_threshold {
            config = config.with_disk_backing_threshold(bytes);
        }
        Ok(config)
    }
}

/// Progress display on stderr.
struct CliProgress {
    verbose: bool,
    last_update: Cell<Instant>,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            last_update: Cell::new(Instant::now()),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        if secs >= 60 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{:.2}s", elapsed.as_secs_f64())
        }
    }

    fn progress_bar(percent: u32) -> String {
        let filled = (percent.min(100) / 5) as usize;
        format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(20 - filled), percent)
    }
}

impl ProgressCallback for CliProgress {
    fn on_started(&self, estimated_total: Option<u64>) {
        if let Some(total) = estimated_total {
            eprintln!("  {total} nodes");
        }
    }

    fn on_node_completed(&self, tick: &ProgressTick) {
        if self.verbose {
            eprintln!("  [{:>5}] {}", tick.processed, tick.path);
            return;
        }
        // At most one redraw every 200ms.
        if self.last_update.get().elapsed() < Duration::from_millis(200) {
            return;
        }
        self.last_update.set(Instant::now());
        match tick.percent() {
            Some(p) => eprint!("\r  {}", Self::progress_bar(p as u32)),
            None => eprint!("\r  {} nodes", tick.processed),
        }
        let _ = std::io::Write::flush(&mut std::io::stderr());
    }

    fn on_finished(&self, stats: &Stats) {
        if !self.verbose {
            eprint!("\r{:40}\r", "");
        }
        eprintln!(
            "  {} groups, {} datasets, {} attributes",
            stats.group_count, stats.dataset_count, stats.attribute_count
        );
        eprintln!(
            "  {} -> {} ({:.1}% smaller) in {}",
            Self::format_bytes(stats.bytes_in),
            Self::format_bytes(stats.bytes_out),
            stats.reduction_ratio() * 100.0,
            Self::format_duration(stats.elapsed)
        );
    }
}

/// Full `source()` chain of an error, one cause per `: `.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut cause = err.source();
    while let Some(c) = cause {
        let text = c.to_string();
        if !msg.contains(&text) {
            msg.push_str(": ");
            msg.push_str(&text);
        }
        cause = c.source();
    }
    msg
}

/// Failure of a single input.
#[derive(Debug)]
struct CliError {
    message: String,
    cancelled: bool,
}

impl CliError {
    fn new(message: impl Into<String>) -> Self {
        CliError {
            message: message.into(),
            cancelled: false,
        }
    }
}

/// Compare a staged output with its source and move it into place only
/// if they match. On mismatch the staged file is dropped, which deletes it.
fn verify_then_persist<S>(
    source: &S,
    staged: StagedFile,
    config: &ShellConfig,
) -> Result<PathBuf, CliError>
where
    S: ReadContainer + ?Sized,
{
    let target = staged.target().to_path_buf();
    let written = open_source(SourceInput::Path(staged.path().to_path_buf()), config)
        .map_err(|e| CliError::new(format!("{}: {}", target.display(), error_chain(&e))))?;
    compare(source, &written).map_err(|m| {
        CliError::new(format!("{}: verification failed: {m}", target.display()))
    })?;
    drop(written);
    staged
        .persist()
        .map_err(|e| CliError::new(format!("{}: {e}", target.display())))
}

fn squash_one(
    input: &Path,
    args: &Args,
    config: &ShellConfig,
    cancel: &Arc<AtomicBool>,
) -> Result<(PathBuf, Stats), CliError> {
    let Some(format) = ContainerFormat::from_path(input) else {
        return Err(CliError::new(format!(
            "{}: not a supported container (expected .hcf, .hcdf, .h5 or .hdf5)",
            input.display()
        )));
    };
    let output = output_path_for(input, args.output_dir.as_deref())
        .map_err(|e| CliError::new(error_chain(&e)))?;

    eprintln!("{} -> {}", input.display(), output.display());
    let source = open_source(SourceInput::Path(input.to_path_buf()), config)
        .map_err(|e| CliError::new(format!("{}: {}", input.display(), error_chain(&e))))?;
    if source.format() != format {
        tracing::warn!(
            input = %input.display(),
            "extension says {format:?} but the contents are {:?}",
            source.format()
        );
    }
    let destination = create_destination(DestinationTarget::Path(output.clone()), format)
        .map_err(|e| CliError::new(format!("{}: {}", output.display(), error_chain(&e))))?;

    let progress = CliProgress::new(args.verbose);
    let transcoder = Transcoder::new(config.codec.clone())
        .with_progress(&progress)
        .with_cancel_flag(Arc::clone(cancel));
    let failed = |e: TranscodeError| CliError {
        message: format!("{}: {}", input.display(), error_chain(&e)),
        cancelled: e.kind() == ErrorKind::Cancelled,
    };

    let stats = if args.verify {
        let done = transcoder
            .run(&source, destination.staging())
            .map_err(failed)?;
        verify_then_persist(&source, done.output, config)?;
        eprintln!("  verified");
        done.stats
    } else {
        transcoder.run(&source, destination).map_err(failed)?.stats
    };
    Ok((output, stats))
}

/// Main CLI logic, separated for testability.
fn run_cli(args: &Args, cancel: &Arc<AtomicBool>) -> Result<Vec<(PathBuf, Stats)>, CliError> {
    let config = args
        .shell_config()
        .map_err(|e| CliError::new(error_chain(&e)))?;
    if let Some(dir) = &args.output_dir {
        if !dir.is_dir() {
            return Err(CliError::new(format!(
                "output directory does not exist: {}",
                dir.display()
            )));
        }
    }

    let mut written = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        written.push(squash_one(input, args, &config, cancel)?);
    }
    Ok(written)
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "hcf=debug" } else { "hcf=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cancel = Arc::new(AtomicBool::new(false));
    for signal in signal_hook::consts::TERM_SIGNALS {
        if let Err(e) = signal_flag::register(*signal, Arc::clone(&cancel)) {
            tracing::warn!("failed to register handler for signal {signal}: {e}");
        }
    }

    let exit_code = match run_cli(&args, &cancel) {
        Ok(_) => 0,
        Err(err) => {
            eprintln!("Error: {}", err.message);
            if err.cancelled {
                130
            } else {
                1
            }
        }
    };

    std::process::exit(exit_code);
}
