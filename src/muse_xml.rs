//! Typed view of a GE MUSE `RestingECG` XML export.
//!
//! Only the elements the converter reads are modelled; everything else in the
//! export (demographics, measurements, diagnosis) is ignored by the
//! deserializer. Repeated elements such as `Waveform`, `LeadData` and `QRS`
//! always land in a `Vec`, so a waveform with a single lead needs no special
//! casing downstream.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{ConvertError, Result};

/// `WaveformType` tag of the continuous diagnostic strip.
pub const RHYTHM_WAVEFORM_TYPE: &str = "Rhythm";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "RestingECG")]
pub struct RestingEcg {
    #[serde(rename = "Waveform", default)]
    pub waveforms: Vec<Waveform>,

    #[serde(rename = "QRSTimesTypes", default)]
    pub qrs_times_types: Option<QrsTimesTypes>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Waveform {
    #[serde(rename = "WaveformType")]
    pub waveform_type: String,

    /// Sampling frequency in Hz.
    #[serde(rename = "SampleBase", default)]
    pub sample_base: Option<u32>,

    #[serde(rename = "LeadData", default)]
    pub leads: Vec<LeadData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeadData {
    #[serde(rename = "LeadID")]
    pub lead_id: String,

    /// Base64 of little-endian 16-bit samples, possibly wrapped over lines.
    #[serde(rename = "WaveFormData")]
    pub waveform_data: String,

    #[serde(rename = "LeadAmplitudeUnitsPerBit")]
    pub units_per_bit: f64,

    #[serde(rename = "LeadAmplitudeUnits")]
    pub units: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QrsTimesTypes {
    #[serde(rename = "QRS", default)]
    pub qrs: Vec<Qrs>,
}

/// One detected beat.
#[derive(Debug, Clone, Deserialize)]
pub struct Qrs {
    #[serde(rename = "Number")]
    pub number: String,

    #[serde(rename = "Type", default)]
    pub type_code: String,

    /// Offset from the start of the recording in milliseconds.
    #[serde(rename = "Time")]
    pub time: i64,
}

impl RestingEcg {
    /// The waveform section tagged as the rhythm strip.
    pub fn rhythm_waveform(&self) -> Result<&Waveform> {
        self.waveforms
            .iter()
            .find(|waveform| waveform.waveform_type.trim() == RHYTHM_WAVEFORM_TYPE)
            .ok_or(ConvertError::NoRhythmWaveform)
    }

    /// Detected beats, empty when the export has no `QRSTimesTypes` section.
    pub fn qrs(&self) -> &[Qrs] {
        self.qrs_times_types
            .as_ref()
            .map(|times| times.qrs.as_slice())
            .unwrap_or_default()
    }
}

pub fn parse_muse_xml(xml: &str) -> Result<RestingEcg> {
    Ok(quick_xml::de::from_str(xml)?)
}

/// Read and parse a MUSE XML export.
pub fn read_muse_file(path: &Path) -> Result<RestingEcg> {
    if !path.exists() {
        return Err(ConvertError::InputNotFound(path.to_path_buf()));
    }

    info!("Reading MUSE file: {}", path.display());
    let xml = std::fs::read_to_string(path)?;
    parse_muse_xml(&xml)
}
