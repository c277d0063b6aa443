use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use log::debug;

use specsplice::{CommitMode, SpliceError, SpliceOptions, SpliceReport, WavelengthWindow};

/// Overwrite a wavelength range of one spectrum with the values from another.
#[derive(Debug, Parser)]
#[command(name = "specsplice", version, about)]
struct Cli {
    /// Spectrum to be overwritten (modified in place)
    target: PathBuf,

    /// Spectrum from which the splice is taken (read-only)
    source: PathBuf,

    /// Low m*lambda limit for the splice
    #[arg(allow_negative_numbers = true)]
    wavelength_low: f64,

    /// High m*lambda limit for the splice
    #[arg(allow_negative_numbers = true)]
    wavelength_high: f64,

    /// Patch a copy of the target and swap it in only if every row succeeds
    #[arg(long, default_value_t = false)]
    atomic: bool,

    /// Also write the per-row outcome as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<(), SpliceError> {
    // checked before touching either file
    let window = WavelengthWindow::new(cli.wavelength_low, cli.wavelength_high)?;

    let options = SpliceOptions {
        commit: if cli.atomic {
            CommitMode::Atomic
        } else {
            CommitMode::InPlace
        },
    };
    debug!("{cli:?} -> {options:?}");

    let stdout = std::io::stdout();
    let mut progress = stdout.lock();
    let report = specsplice::splice_files(&cli.target, &cli.source, &window, &options, &mut progress)?;

    if let Some(path) = &cli.report {
        write_report(path, &report)?;
    }
    Ok(())
}

fn write_report(path: &Path, report: &SpliceReport) -> Result<(), SpliceError> {
    let file = File::create(path).map_err(|e| SpliceError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)
        .map_err(|e| SpliceError::io(path, e.into()))?;
    writer.flush().map_err(|e| SpliceError::io(path, e))
}
