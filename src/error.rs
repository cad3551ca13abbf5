use std::path::PathBuf;

use crate::lead::Lead;

pub type Result<T> = std::result::Result<T, ConvertError>;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("MUSE file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse MUSE XML: {0}")]
    Xml(#[from] quick_xml::de::DeError),

    #[error("no 'Rhythm' waveform found in MUSE ECG file")]
    NoRhythmWaveform,

    #[error("unknown amplitude unit: {0}")]
    UnknownUnit(String),

    #[error("invalid base64 waveform data for lead {lead}: {source}")]
    InvalidBase64 {
        lead: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("waveform data for lead {lead} has odd length {len}, expected 16-bit samples")]
    OddSampleBuffer { lead: String, len: usize },

    #[error("incomplete lead set, missing: {}", join_leads(.missing))]
    IncompleteLeadSet { missing: Vec<Lead> },

    #[error("missing waveform data for lead: {0}")]
    MissingWaveform(Lead),

    #[error("lead {lead} has {len} samples, expected {expected}")]
    LeadLengthMismatch {
        lead: Lead,
        len: usize,
        expected: usize,
    },

    #[error("annotation {label} at sample {sample} is out of order (previous sample {previous})")]
    UnorderedAnnotation {
        label: String,
        sample: i64,
        previous: i64,
    },

    #[error("annotation {label} at sample {sample} is too far after sample {previous}")]
    AnnotationGapTooLarge {
        label: String,
        sample: i64,
        previous: i64,
    },

    #[error("annotation note {0:?} exceeds 255 bytes")]
    AuxNoteTooLong(String),

    #[error("invalid sampling frequency: {0} Hz")]
    InvalidSamplingFrequency(u32),

    #[error("record path {} does not name a record", .0.display())]
    InvalidRecordPath(PathBuf),

    #[error("failed to move output into place: {0}")]
    Persist(#[from] tempfile::PersistError),
}

fn join_leads(leads: &[Lead]) -> String {
    leads
        .iter()
        .map(|lead| lead.name())
        .collect::<Vec<_>>()
        .join(", ")
}
