//! Command-line unpacker: turns any supported trace capture (systrace
//! HTML, zlib-compressed ftrace, plain ftrace) into plain trace text.
//!
//! Batch mode is embarrassingly parallel at whole-file granularity; the
//! pipeline itself is single-threaded per import.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use workerpool::thunk::{Thunk, ThunkWorker};
use workerpool::Pool;

use tracestream::{ExtractorRegistry, FileProducer, ImportFeedback, StreamingReader};

#[derive(Parser)]
#[command(
    name = "tracestream",
    about = "Unpack Android trace captures into plain trace text"
)]
struct Command {
    /// Trace capture files to unpack.
    inputs: Vec<PathBuf>,

    /// Output file for a single input (stdout if omitted), or output
    /// directory when unpacking multiple inputs.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Worker threads for batch unpacking.
    #[arg(short = 'j', long, default_value = "4")]
    workers: usize,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let opts = Command::parse();

    let level = if opts.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if opts.inputs.is_empty() {
        bail!("no input files given");
    }

    if opts.inputs.len() == 1 {
        return unpack_one(&opts.inputs[0], opts.output.as_deref());
    }

    let out_dir = match &opts.output {
        Some(dir) => dir.clone(),
        None => bail!("unpacking multiple inputs requires --output <DIR>"),
    };
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let pool = Pool::<ThunkWorker<()>>::new(opts.workers.max(1));
    for input in opts.inputs {
        let out_dir = out_dir.clone();
        pool.execute(Thunk::of(move || {
            let stem = input
                .file_stem()
                .unwrap_or_else(|| input.as_os_str())
                .to_os_string();
            let mut output = out_dir.join(stem);
            output.set_extension("txt");
            if let Err(err) = unpack_one(&input, Some(&output)) {
                log::error!("failed to unpack {}: {err:#}", input.display());
            }
        }));
    }
    pool.join();
    Ok(())
}

fn unpack_one(input: &Path, output: Option<&Path>) -> Result<()> {
    let feedback = ImportFeedback::new();
    let source = FileProducer::open(input, feedback.clone())
        .with_context(|| format!("failed to open {}", input.display()))?;

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };

    let registry = ExtractorRegistry::with_defaults();
    let mut segments = 0usize;
    let mut bytes = 0usize;
    registry.unwrap_all(Box::new(source), &feedback, &mut |reader: &mut StreamingReader| {
        segments += 1;
        for chunk in reader.iter(0) {
            bytes += chunk.len();
            out.write_all(chunk.as_bytes())?;
        }
        Ok(())
    })?;
    out.flush()?;

    if feedback.has_errors() {
        bail!(
            "{}: import reported {} error(s)",
            input.display(),
            feedback.error_count()
        );
    }
    log::info!(
        "{}: unpacked {} segment(s), {} bytes of trace text",
        input.display(),
        segments,
        bytes
    );
    Ok(())
}
