use std::path::{Path, PathBuf};

use tracing::info;

use crate::annotations::extract_annotations;
use crate::ecg_process::process_waveforms;
use crate::error::Result;
use crate::muse_xml::read_muse_file;
use crate::wfdb_write::{stage_qrs_annotations, stage_wfdb};

pub const DEFAULT_RECORD_NAME: &str = "wfdb_record";
pub const DEFAULT_SAMPLING_FREQUENCY: u32 = 500;

/// Settings for one conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Output record path without extension.
    pub record: PathBuf,
    /// Free-text lines written to the header.
    pub comments: Vec<String>,
    /// Used when the rhythm waveform has no `SampleBase`.
    pub default_sampling_frequency: u32,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            record: PathBuf::from(DEFAULT_RECORD_NAME),
            comments: Vec::new(),
            default_sampling_frequency: DEFAULT_SAMPLING_FREQUENCY,
        }
    }
}

impl ConvertOptions {
    pub fn new(record: impl Into<PathBuf>) -> Self {
        Self {
            record: record.into(),
            ..Self::default()
        }
    }

    pub fn with_comments<I, S>(mut self, comments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.comments = comments.into_iter().map(Into::into).collect();
        self
    }
}

/// Convert a MUSE XML export into a WFDB record.
///
/// Returns whether an annotation file was written. Nothing is written unless
/// every step succeeds.
pub fn muse_to_wfdb(path: &Path, options: &ConvertOptions) -> Result<bool> {
    info!("Converting MUSE XML to WFDB: {}", path.display());

    let ecg = read_muse_file(path)?;
    let waveform = ecg.rhythm_waveform()?;
    let fs = waveform
        .sample_base
        .unwrap_or(options.default_sampling_frequency);

    let lead_waveforms = process_waveforms(waveform)?;
    let mut pending = stage_wfdb(&options.record, &lead_waveforms, &options.comments, fs)?;

    let qrs = ecg.qrs();
    let annotated = !qrs.is_empty();
    if annotated {
        let annotations = extract_annotations(qrs);
        pending.extend(stage_qrs_annotations(&options.record, &annotations)?);
    }

    for destination in pending.destinations() {
        info!("Writing {}", destination.display());
    }
    pending.commit()?;

    info!("MUSE XML to WFDB conversion completed successfully.");
    Ok(annotated)
}
