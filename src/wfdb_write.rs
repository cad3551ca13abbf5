//! WFDB record writer: `.hea` header, format-16 `.dat` signal file and MIT
//! `.atr` annotation file.
//!
//! Files are first written to temporary files next to their destination and
//! only moved into place by [`PendingFiles::commit`]. If moving one of them
//! fails, the files already moved are removed and any files they replaced
//! are put back.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{is_separator, Path, PathBuf};

use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, warn};

use crate::annotations::BeatAnnotation;
use crate::ecg_process::{LeadWaveforms, SignalMatrix};
use crate::error::{ConvertError, Result};
use crate::lead::{Lead, LEAD_COUNT};

/// Format-16 digital range. -32768 is WFDB's invalid-sample marker.
const DIG_MIN: f64 = -32767.0;
const DIG_MAX: f64 = 32767.0;

const SIGNAL_FORMAT: u32 = 16;
const ADC_RESOLUTION: u32 = 16;
const UNITS: &str = "mV";

// MIT annotation pseudo-codes
const SKIP: u16 = 59;
const AUX: u16 = 63;
const MAX_INTERVAL: i64 = 1023;

/// `<record>.<ext>`, keeping any dots already in the record name.
pub fn record_file(record: &Path, ext: &str) -> PathBuf {
    let mut path = OsString::from(record.as_os_str());
    path.push(".");
    path.push(ext);
    PathBuf::from(path)
}

/// Record name for the header: the last path component, which must be a
/// plain file name since header fields are space separated.
pub fn record_name(record: &Path) -> Result<String> {
    let raw = record.as_os_str().to_string_lossy();
    let name = match record.file_name() {
        Some(name) if !raw.ends_with(is_separator) => name.to_string_lossy(),
        _ => return Err(ConvertError::InvalidRecordPath(record.to_path_buf())),
    };

    if name.chars().any(char::is_whitespace) {
        return Err(ConvertError::InvalidRecordPath(record.to_path_buf()));
    }
    Ok(name.into_owned())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Output files written to temporary storage and not yet in place.
#[derive(Debug, Default)]
pub struct PendingFiles {
    files: Vec<(NamedTempFile, PathBuf)>,
}

impl PendingFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `bytes` to a temporary file in the destination's directory.
    pub fn stage(&mut self, destination: PathBuf, bytes: &[u8]) -> Result<()> {
        let mut temp = NamedTempFile::new_in(parent_dir(&destination))?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            writer.write_all(bytes)?;
            writer.flush()?;
        }
        self.files.push((temp, destination));
        Ok(())
    }

    pub fn extend(&mut self, other: PendingFiles) {
        self.files.extend(other.files);
    }

    pub fn destinations(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|(_, path)| path.as_path())
    }

    /// Move every staged file to its destination, all or nothing.
    pub fn commit(self) -> Result<()> {
        let mut backups = Vec::new();
        let mut written = Vec::new();

        for (temp, destination) in self.files {
            if let Err(error) = replace(temp, &destination, &mut backups) {
                roll_back(written, backups);
                return Err(error);
            }
            debug!("Wrote {}", destination.display());
            written.push(destination);
        }
        Ok(())
    }
}

/// Move `temp` over `destination`, first setting aside an existing file.
fn replace(
    temp: NamedTempFile,
    destination: &Path,
    backups: &mut Vec<(TempPath, PathBuf)>,
) -> Result<()> {
    if destination.is_file() {
        let backup = tempfile::Builder::new()
            .prefix(".backup-")
            .tempfile_in(parent_dir(destination))?
            .into_temp_path();
        fs::rename(destination, &backup)?;
        backups.push((backup, destination.to_path_buf()));
    }

    temp.persist(destination)?;
    Ok(())
}

/// Undo a partial commit. Backups not restored here are deleted on drop.
fn roll_back(written: Vec<PathBuf>, backups: Vec<(TempPath, PathBuf)>) {
    for path in written {
        if let Err(error) = fs::remove_file(&path) {
            warn!("Failed to remove {}: {}", path.display(), error);
        }
    }
    for (backup, destination) in backups {
        if let Err(error) = backup.persist(&destination) {
            warn!("Failed to restore {}: {}", destination.display(), error);
        }
    }
}

/// Linear mapping from physical (mV) to digital units for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdcParams {
    pub gain: f64,
    pub baseline: i32,
}

impl AdcParams {
    /// Spread the channel's physical range over the full digital range.
    pub fn from_range(p_min: f64, p_max: f64) -> Self {
        if p_min == p_max {
            // Flat channel
            let gain = if p_min == 0.0 { 1.0 } else { DIG_MAX / p_min.abs() };
            return Self { gain, baseline: 0 };
        }

        let gain = (DIG_MAX - DIG_MIN) / (p_max - p_min);
        let baseline = (DIG_MIN - p_min * gain).round();

        // A narrow range far from zero needs a baseline beyond i32. Pin the
        // baseline and shrink the gain so the range still fits.
        if baseline > i32::MAX as f64 {
            let baseline = i32::MAX;
            let gain = (DIG_MAX - baseline as f64) / p_max;
            return Self { gain, baseline };
        }
        if baseline < i32::MIN as f64 {
            let baseline = i32::MIN;
            let gain = (DIG_MIN - baseline as f64) / p_min;
            return Self { gain, baseline };
        }

        Self {
            gain,
            baseline: baseline as i32,
        }
    }

    pub fn from_samples(samples: impl Iterator<Item = f64>) -> Self {
        let (p_min, p_max) = samples.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        Self::from_range(p_min, p_max)
    }

    pub fn digitize(&self, value: f64) -> i16 {
        (value * self.gain + self.baseline as f64)
            .round()
            .clamp(DIG_MIN, DIG_MAX) as i16
    }

    pub fn to_physical(&self, digital: i16) -> f64 {
        (digital as f64 - self.baseline as f64) / self.gain
    }
}

/// A signal matrix quantized to format-16 samples.
#[derive(Debug, Clone)]
pub struct DigitalRecord {
    pub adc: [AdcParams; LEAD_COUNT],
    pub frames: Vec<[i16; LEAD_COUNT]>,
}

impl DigitalRecord {
    pub fn from_matrix(matrix: &SignalMatrix) -> Self {
        let adc = Lead::ALL.map(|lead| AdcParams::from_samples(matrix.column(lead)));
        let frames = matrix
            .frames()
            .iter()
            .map(|frame| std::array::from_fn(|c| adc[c].digitize(frame[c])))
            .collect();
        Self { adc, frames }
    }

    /// 16-bit checksum of one channel, as stored in the header.
    pub fn checksum(&self, lead: Lead) -> i16 {
        let sum: i64 = self.frames.iter().map(|f| f[lead.index()] as i64).sum();
        (sum & 0xffff) as u16 as i16
    }

    pub fn initial_value(&self, lead: Lead) -> i16 {
        self.frames.first().map(|f| f[lead.index()]).unwrap_or(0)
    }

    /// Interleaved little-endian samples, one frame after another.
    pub fn to_dat_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.frames.len() * LEAD_COUNT * 2);
        for frame in &self.frames {
            for sample in frame {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
        }
        bytes
    }

    pub fn header(&self, name: &str, fs: u32, comments: &[String]) -> String {
        let mut header = String::new();
        let _ = writeln!(header, "{} {} {} {}", name, LEAD_COUNT, fs, self.frames.len());
        for lead in Lead::ALL {
            let adc = self.adc[lead.index()];
            let _ = writeln!(
                header,
                "{}.dat {} {}({})/{} {} 0 {} {} 0 {}",
                name,
                SIGNAL_FORMAT,
                adc.gain,
                adc.baseline,
                UNITS,
                ADC_RESOLUTION,
                self.initial_value(lead),
                self.checksum(lead),
                lead.name(),
            );
        }
        for line in comments.iter().flat_map(|comment| comment.lines()) {
            let _ = writeln!(header, "# {}", line);
        }
        header
    }
}

/// Stage the `.hea` and `.dat` files of a 12-lead record.
pub fn stage_wfdb(
    record: &Path,
    lead_waveforms: &LeadWaveforms,
    comments: &[String],
    fs: u32,
) -> Result<PendingFiles> {
    if fs == 0 {
        return Err(ConvertError::InvalidSamplingFrequency(fs));
    }

    let name = record_name(record)?;
    info!("Saving WFDB record '{}' at {} Hz", name, fs);

    let matrix = lead_waveforms.to_matrix()?;
    let digital = DigitalRecord::from_matrix(&matrix);

    let mut pending = PendingFiles::new();
    pending.stage(
        record_file(record, "hea"),
        digital.header(&name, fs, comments).as_bytes(),
    )?;
    pending.stage(record_file(record, "dat"), &digital.to_dat_bytes())?;
    Ok(pending)
}

/// Write the `.hea` and `.dat` files of a 12-lead record.
pub fn save_wfdb(
    record: &Path,
    lead_waveforms: &LeadWaveforms,
    comments: &[String],
    fs: u32,
) -> Result<()> {
    stage_wfdb(record, lead_waveforms, comments, fs)?.commit()?;
    info!(
        "WFDB files saved: {} / {}",
        record_file(record, "hea").display(),
        record_file(record, "dat").display()
    );
    Ok(())
}

fn push_word(bytes: &mut Vec<u8>, code: u16, value: u16) {
    bytes.extend_from_slice(&((code << 10) | value).to_le_bytes());
}

/// Encode annotations in MIT format.
///
/// Each annotation is a 16-bit word holding the type code in its top six
/// bits and the sample delta in the low ten; longer deltas go in a SKIP
/// word carrying a 32-bit interval (high half first). Labels follow as AUX
/// words, padded to an even length.
pub fn encode_annotations(annotations: &[BeatAnnotation]) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut previous = 0i64;

    for annotation in annotations {
        let delta = annotation.sample - previous;
        if delta < 0 {
            return Err(ConvertError::UnorderedAnnotation {
                label: annotation.label.clone(),
                sample: annotation.sample,
                previous,
            });
        }

        let code = annotation.symbol.mit_code();
        if delta > MAX_INTERVAL {
            let interval =
                i32::try_from(delta).map_err(|_| ConvertError::AnnotationGapTooLarge {
                    label: annotation.label.clone(),
                    sample: annotation.sample,
                    previous,
                })?;
            push_word(&mut bytes, SKIP, 0);
            bytes.extend_from_slice(&((interval >> 16) as u16).to_le_bytes());
            bytes.extend_from_slice(&(interval as u16).to_le_bytes());
            push_word(&mut bytes, code, 0);
        } else {
            push_word(&mut bytes, code, delta as u16);
        }

        let aux = annotation.label.as_bytes();
        if !aux.is_empty() {
            if aux.len() > 255 {
                return Err(ConvertError::AuxNoteTooLong(annotation.label.clone()));
            }
            push_word(&mut bytes, AUX, aux.len() as u16);
            bytes.extend_from_slice(aux);
            if aux.len() % 2 == 1 {
                bytes.push(0);
            }
        }

        previous = annotation.sample;
    }

    bytes.extend_from_slice(&[0, 0]);
    Ok(bytes)
}

/// Stage the `.atr` annotation file of a record.
pub fn stage_qrs_annotations(
    record: &Path,
    annotations: &[BeatAnnotation],
) -> Result<PendingFiles> {
    info!("Saving QRS annotations for record '{}'", record_name(record)?);
    let bytes = encode_annotations(annotations)?;

    let mut pending = PendingFiles::new();
    pending.stage(record_file(record, "atr"), &bytes)?;
    debug!("Saved {} QRS annotations.", annotations.len());
    Ok(pending)
}

/// Write the `.atr` annotation file of a record.
pub fn save_qrs_annotations(record: &Path, annotations: &[BeatAnnotation]) -> Result<()> {
    stage_qrs_annotations(record, annotations)?.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::BeatSymbol;
    use pretty_assertions::assert_eq;

    fn beat(sample: i64, symbol: BeatSymbol, label: &str) -> BeatAnnotation {
        BeatAnnotation {
            sample,
            symbol,
            label: label.to_string(),
        }
    }

    fn ramp_leads(n: usize) -> LeadWaveforms {
        let mut leads = LeadWaveforms::new();
        for lead in Lead::ALL {
            let offset = lead.index() as f64;
            leads.insert(lead, (0..n).map(|t| t as f64 * 0.01 - offset).collect());
        }
        leads
    }

    #[test]
    fn record_file_appends_extension() {
        assert_eq!(
            record_file(Path::new("out/patient.001"), "hea"),
            PathBuf::from("out/patient.001.hea")
        );
    }

    #[test]
    fn adc_maps_range_onto_digital_limits() {
        let adc = AdcParams::from_range(-1.0, 3.0);
        assert_eq!(adc.digitize(-1.0), -32767);
        assert_eq!(adc.digitize(3.0), 32767);
        assert!((adc.to_physical(adc.digitize(1.25)) - 1.25).abs() < 1e-3);
    }

    #[test]
    fn flat_channels_get_a_usable_gain() {
        let zero = AdcParams::from_range(0.0, 0.0);
        assert_eq!(zero, AdcParams { gain: 1.0, baseline: 0 });
        assert_eq!(zero.digitize(0.0), 0);

        let flat = AdcParams::from_range(-0.5, -0.5);
        assert_eq!(flat.digitize(-0.5), -32767);
    }

    #[test]
    fn near_full_scale_derived_lead_keeps_its_values() {
        let mut leads = LeadWaveforms::new();
        leads.insert(Lead::I, vec![32767.0; 4]);
        leads.insert(Lead::II, vec![32766.0, 32767.0, 32766.0, 32767.0]);
        assert!(leads.derive_limb_leads().unwrap());
        for lead in [Lead::V1, Lead::V2, Lead::V3, Lead::V4, Lead::V5, Lead::V6] {
            leads.insert(lead, vec![0.0; 4]);
        }
        let matrix = leads.to_matrix().unwrap();
        let digital = DigitalRecord::from_matrix(&matrix);

        let adc = digital.adc[Lead::AVR.index()];
        assert_eq!(adc.baseline, i32::MAX);
        for (frame, expected) in digital.frames.iter().zip(matrix.column(Lead::AVR)) {
            let physical = adc.to_physical(frame[Lead::AVR.index()]);
            assert!((physical - expected).abs() < 1e-3, "{physical} vs {expected}");
        }
    }

    #[test]
    fn narrow_positive_range_pins_baseline_low() {
        let adc = AdcParams::from_range(32766.5, 32767.0);
        assert_eq!(adc.baseline, i32::MIN);
        assert_eq!(adc.digitize(32766.5), -32767);
        for value in [32766.5, 32766.75, 32767.0] {
            assert!((adc.to_physical(adc.digitize(value)) - value).abs() < 1e-3);
        }
    }

    #[test]
    fn multi_line_comments_become_separate_header_lines() {
        let digital = DigitalRecord::from_matrix(&ramp_leads(2).to_matrix().unwrap());
        let header = digital.header("rec", 500, &["Age: 75\nDx: 316998\r\n".to_string()]);
        let comments: Vec<&str> = header.lines().skip(13).collect();
        assert_eq!(comments, vec!["# Age: 75", "# Dx: 316998"]);
    }

    #[test]
    fn record_path_must_name_a_record() {
        assert_eq!(record_name(Path::new("out/rec")).unwrap(), "rec");
        for path in ["out/", "..", "", "my record"] {
            assert!(
                matches!(
                    record_name(Path::new(path)),
                    Err(ConvertError::InvalidRecordPath(_))
                ),
                "{path:?}"
            );
        }

        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("out").join("");
        assert!(matches!(
            save_wfdb(&record, &ramp_leads(3), &[], 500),
            Err(ConvertError::InvalidRecordPath(_))
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn header_lists_leads_in_order() {
        let digital = DigitalRecord::from_matrix(&ramp_leads(10).to_matrix().unwrap());
        let header = digital.header(
            "patient001_ecg",
            500,
            &["Age: 75".to_string(), "Dx: 316998".to_string()],
        );
        let lines: Vec<&str> = header.lines().collect();

        assert_eq!(lines.len(), 1 + 12 + 2);
        assert_eq!(lines[0], "patient001_ecg 12 500 10");
        for (line, lead) in lines[1..13].iter().zip(Lead::ALL) {
            let fields: Vec<&str> = line.split(' ').collect();
            assert_eq!(fields[0], "patient001_ecg.dat");
            assert_eq!(fields[1], "16");
            assert!(fields[2].ends_with(")/mV"), "{}", fields[2]);
            assert_eq!(fields[3], "16");
            assert_eq!(fields[8], lead.name());
            assert_eq!(fields[5], digital.initial_value(lead).to_string());
            assert_eq!(fields[6], digital.checksum(lead).to_string());
        }
        assert_eq!(lines[13], "# Age: 75");
        assert_eq!(lines[14], "# Dx: 316998");
    }

    #[test]
    fn checksum_wraps_to_sixteen_bits() {
        let digital = DigitalRecord {
            adc: [AdcParams { gain: 1.0, baseline: 0 }; LEAD_COUNT],
            frames: vec![[32767; LEAD_COUNT], [32767; LEAD_COUNT], [3; LEAD_COUNT]],
        };
        // 65537 mod 65536
        assert_eq!(digital.checksum(Lead::I), 1);
        assert_eq!(digital.initial_value(Lead::V6), 32767);
    }

    #[test]
    fn dat_bytes_are_frame_interleaved() {
        let mut frame = [0i16; LEAD_COUNT];
        for (c, sample) in frame.iter_mut().enumerate() {
            *sample = c as i16 - 6;
        }
        let digital = DigitalRecord {
            adc: [AdcParams { gain: 1.0, baseline: 0 }; LEAD_COUNT],
            frames: vec![frame, frame],
        };
        let bytes = digital.to_dat_bytes();
        assert_eq!(bytes.len(), 2 * LEAD_COUNT * 2);
        assert_eq!(&bytes[..4], &[0xfa, 0xff, 0xfb, 0xff]);
        assert_eq!(&bytes[24..26], &[0xfa, 0xff]);
    }

    #[test]
    fn encodes_short_interval_with_aux_note() {
        let bytes = encode_annotations(&[beat(120, BeatSymbol::Normal, "QRS_1")]).unwrap();
        assert_eq!(
            bytes,
            vec![0x78, 0x04, 0x05, 0xfc, b'Q', b'R', b'S', b'_', b'1', 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn encodes_long_interval_as_skip() {
        let bytes = encode_annotations(&[
            beat(5000, BeatSymbol::Ventricular, ""),
            beat(5010, BeatSymbol::Supraventricular, ""),
        ])
        .unwrap();
        assert_eq!(
            bytes,
            vec![
                0x00, 0xec, // SKIP
                0x00, 0x00, 0x88, 0x13, // 5000
                0x00, 0x14, // V, delta 0
                0x0a, 0x24, // S, delta 10
                0x00, 0x00,
            ]
        );
    }

    #[test]
    fn empty_annotation_list_is_just_the_terminator() {
        assert_eq!(encode_annotations(&[]).unwrap(), vec![0, 0]);
    }

    #[test]
    fn decreasing_samples_are_rejected() {
        let result = encode_annotations(&[
            beat(300, BeatSymbol::Normal, "QRS_1"),
            beat(200, BeatSymbol::Normal, "QRS_2"),
        ]);
        assert!(matches!(
            result,
            Err(ConvertError::UnorderedAnnotation { sample: 200, previous: 300, .. })
        ));
        assert!(encode_annotations(&[beat(-1, BeatSymbol::Normal, "QRS_0")]).is_err());
    }

    #[test]
    fn gap_beyond_signed_32_bits_is_rejected() {
        let limit = i32::MAX as i64;
        assert!(encode_annotations(&[beat(limit, BeatSymbol::Normal, "")]).is_ok());
        assert!(matches!(
            encode_annotations(&[beat(limit + 1, BeatSymbol::Normal, "QRS_1")]),
            Err(ConvertError::AnnotationGapTooLarge { previous: 0, .. })
        ));
    }

    #[test]
    fn overlong_aux_note_is_rejected() {
        let label = "x".repeat(256);
        assert!(matches!(
            encode_annotations(&[beat(0, BeatSymbol::Normal, &label)]),
            Err(ConvertError::AuxNoteTooLong(_))
        ));
    }

    #[test]
    fn save_writes_header_and_data() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("rec");
        save_wfdb(&record, &ramp_leads(40), &[], 250).unwrap();

        let header = std::fs::read_to_string(dir.path().join("rec.hea")).unwrap();
        assert!(header.starts_with("rec 12 250 40\n"));
        let dat = std::fs::read(dir.path().join("rec.dat")).unwrap();
        assert_eq!(dat.len(), 40 * 12 * 2);
    }

    #[test]
    fn failed_staging_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("rec");
        let mut leads = ramp_leads(5);
        leads.insert(Lead::V1, Vec::new());

        assert!(matches!(
            save_wfdb(&record, &leads, &[], 500),
            Err(ConvertError::MissingWaveform(Lead::V1))
        ));
        assert!(matches!(
            save_wfdb(&record, &ramp_leads(5), &[], 0),
            Err(ConvertError::InvalidSamplingFrequency(0))
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn unwritable_destination_leaves_no_header() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("rec");
        std::fs::create_dir(dir.path().join("rec.dat")).unwrap();

        assert!(save_wfdb(&record, &ramp_leads(5), &[], 500).is_err());
        assert!(!dir.path().join("rec.hea").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_commit_restores_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("rec");
        save_wfdb(&record, &ramp_leads(40), &[], 250).unwrap();
        let old_header = std::fs::read(dir.path().join("rec.hea")).unwrap();
        let old_dat = std::fs::read(dir.path().join("rec.dat")).unwrap();
        std::fs::create_dir(dir.path().join("rec.atr")).unwrap();

        let mut pending = stage_wfdb(&record, &ramp_leads(10), &[], 500).unwrap();
        pending.extend(
            stage_qrs_annotations(&record, &[beat(3, BeatSymbol::Normal, "QRS_1")]).unwrap(),
        );
        assert!(pending.commit().is_err());

        assert_eq!(std::fs::read(dir.path().join("rec.hea")).unwrap(), old_header);
        assert_eq!(std::fs::read(dir.path().join("rec.dat")).unwrap(), old_dat);
        // No staged or backup files are left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }
}
