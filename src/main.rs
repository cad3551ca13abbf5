use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use muse2wfdb::convert::{DEFAULT_RECORD_NAME, DEFAULT_SAMPLING_FREQUENCY};
use muse2wfdb::wfdb_write::record_file;
use muse2wfdb::{muse_to_wfdb, ConvertOptions};

#[derive(Parser)]
#[command(name = "muse2wfdb")]
#[command(about = "Convert a GE MUSE XML ECG export to WFDB")]
struct Cli {
    /// MUSE XML export
    input: PathBuf,

    /// Output record path, without extension
    #[arg(short, long, default_value = DEFAULT_RECORD_NAME)]
    output: PathBuf,

    /// Header comment line (repeatable)
    #[arg(short, long = "comment")]
    comments: Vec<String>,

    /// Sampling frequency in Hz when the export has no SampleBase
    #[arg(long, default_value_t = DEFAULT_SAMPLING_FREQUENCY)]
    default_fs: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let options = ConvertOptions {
        record: cli.output,
        comments: cli.comments,
        default_sampling_frequency: cli.default_fs,
    };

    let annotated = muse_to_wfdb(&cli.input, &options)
        .with_context(|| format!("Failed to convert {}", cli.input.display()))?;

    println!("Header written: {}", record_file(&options.record, "hea").display());
    println!("Signals written: {}", record_file(&options.record, "dat").display());
    if annotated {
        println!(
            "Annotations written: {}",
            record_file(&options.record, "atr").display()
        );
    } else {
        println!("No QRS annotations in export");
    }

    Ok(())
}
