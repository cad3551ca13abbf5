use std::collections::BTreeMap;

use base64::{engine::general_purpose, Engine as _};
use tracing::{debug, warn};

use crate::error::{ConvertError, Result};
use crate::lead::{Lead, LEAD_COUNT};
use crate::muse_xml::{LeadData, Waveform};
use crate::units::unit_scale;

/// Decode a base64 blob of little-endian signed 16-bit samples.
///
/// Whitespace is ignored, since MUSE wraps the blob over many lines.
pub fn decode_samples(lead_id: &str, encoded: &str) -> Result<Vec<i16>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = general_purpose::STANDARD
        .decode(compact)
        .map_err(|source| ConvertError::InvalidBase64 {
            lead: lead_id.to_string(),
            source,
        })?;

    if bytes.len() % 2 != 0 {
        return Err(ConvertError::OddSampleBuffer {
            lead: lead_id.to_string(),
            len: bytes.len(),
        });
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Decode one lead record into millivolts.
pub fn decode_lead(lead: &LeadData) -> Result<Vec<f64>> {
    let samples = decode_samples(lead.lead_id.trim(), &lead.waveform_data)?;
    let scale = lead.units_per_bit * unit_scale(&lead.units)?;
    Ok(samples.iter().map(|&s| s as f64 * scale).collect())
}

/// The four limb leads that follow from I and II.
#[derive(Debug, Clone, PartialEq)]
pub struct LimbLeads {
    pub iii: Vec<f64>,
    pub avr: Vec<f64>,
    pub avl: Vec<f64>,
    pub avf: Vec<f64>,
}

/// Compute III, aVR, aVL and aVF from leads I and II, sample by sample.
pub fn derive_limb_leads(lead_i: &[f64], lead_ii: &[f64]) -> Result<LimbLeads> {
    if lead_i.len() != lead_ii.len() {
        return Err(ConvertError::LeadLengthMismatch {
            lead: Lead::II,
            len: lead_ii.len(),
            expected: lead_i.len(),
        });
    }

    let pairs = || lead_i.iter().zip(lead_ii);
    Ok(LimbLeads {
        iii: pairs().map(|(i, ii)| ii - i).collect(),
        avr: pairs().map(|(i, ii)| -(i + ii) / 2.0).collect(),
        avl: pairs().map(|(i, ii)| i - 0.5 * ii).collect(),
        avf: pairs().map(|(i, ii)| ii - 0.5 * i).collect(),
    })
}

/// Per-lead waveforms in millivolts for one conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadWaveforms {
    leads: BTreeMap<Lead, Vec<f64>>,
}

impl LeadWaveforms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, lead: Lead, samples: Vec<f64>) {
        self.leads.insert(lead, samples);
    }

    pub fn get(&self, lead: Lead) -> Option<&[f64]> {
        self.leads.get(&lead).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.leads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leads.is_empty()
    }

    /// Leads of the standard set with no waveform, in column order.
    pub fn missing(&self) -> Vec<Lead> {
        Lead::ALL
            .into_iter()
            .filter(|lead| !self.leads.contains_key(lead))
            .collect()
    }

    /// Fill in III, aVR, aVL and aVF from I and II.
    ///
    /// Returns `false`, leaving the set untouched, when I or II is absent.
    pub fn derive_limb_leads(&mut self) -> Result<bool> {
        let (Some(lead_i), Some(lead_ii)) = (self.get(Lead::I), self.get(Lead::II)) else {
            warn!("Cannot compute derived leads: leads I or II missing.");
            return Ok(false);
        };

        let limb = derive_limb_leads(lead_i, lead_ii)?;
        self.insert(Lead::III, limb.iii);
        self.insert(Lead::AVR, limb.avr);
        self.insert(Lead::AVL, limb.avl);
        self.insert(Lead::AVF, limb.avf);
        debug!("Derived leads (III, aVR, aVL, aVF) computed.");
        Ok(true)
    }

    /// Stack all 12 leads into a frame-major matrix.
    pub fn to_matrix(&self) -> Result<SignalMatrix> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(ConvertError::IncompleteLeadSet { missing });
        }

        let mut columns: Vec<&[f64]> = Vec::with_capacity(LEAD_COUNT);
        for lead in Lead::ALL {
            let samples = self.get(lead).unwrap_or_default();
            if samples.is_empty() {
                return Err(ConvertError::MissingWaveform(lead));
            }
            columns.push(samples);
        }

        let n_samples = columns[0].len();
        for (lead, samples) in Lead::ALL.into_iter().zip(&columns) {
            if samples.len() != n_samples {
                return Err(ConvertError::LeadLengthMismatch {
                    lead,
                    len: samples.len(),
                    expected: n_samples,
                });
            }
        }

        let frames = (0..n_samples)
            .map(|t| std::array::from_fn(|c| columns[c][t]))
            .collect();
        Ok(SignalMatrix { frames })
    }
}

/// A complete 12-lead recording, one row per sample instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMatrix {
    frames: Vec<[f64; LEAD_COUNT]>,
}

impl SignalMatrix {
    /// (samples, channels)
    pub fn shape(&self) -> (usize, usize) {
        (self.frames.len(), LEAD_COUNT)
    }

    pub fn frames(&self) -> &[[f64; LEAD_COUNT]] {
        &self.frames
    }

    pub fn column(&self, lead: Lead) -> impl Iterator<Item = f64> + '_ {
        self.frames.iter().map(move |frame| frame[lead.index()])
    }
}

/// Decode every lead of a waveform section and derive the limb leads.
///
/// Lead ids outside the 12-lead set are skipped. The result may still be
/// incomplete; [`LeadWaveforms::to_matrix`] enforces completeness.
pub fn process_waveforms(waveform: &Waveform) -> Result<LeadWaveforms> {
    let mut lead_waveforms = LeadWaveforms::new();

    for lead in &waveform.leads {
        let Some(id) = Lead::from_id(&lead.lead_id) else {
            warn!("Skipping unsupported lead {:?}", lead.lead_id.trim());
            continue;
        };

        let samples = decode_lead(lead)?;
        debug!("Processed lead {}: {} samples.", id, samples.len());
        lead_waveforms.insert(id, samples);
    }

    lead_waveforms.derive_limb_leads()?;
    Ok(lead_waveforms)
}

/// Decode a waveform section into a complete signal matrix.
pub fn assemble_signal_matrix(waveform: &Waveform) -> Result<SignalMatrix> {
    process_waveforms(waveform)?.to_matrix()
}
