use tracing::debug;

use crate::muse_xml::Qrs;

/// Beat classification written to the annotation file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatSymbol {
    Normal,
    Ventricular,
    Supraventricular,
}

impl BeatSymbol {
    /// Map a MUSE QRS `Type` code.
    ///
    /// Codes other than 0, 1 and 2 are classified as normal beats.
    pub fn from_type_code(code: &str) -> Self {
        match code.trim() {
            "0" => BeatSymbol::Normal,
            "1" => BeatSymbol::Ventricular,
            "2" => BeatSymbol::Supraventricular,
            _ => BeatSymbol::Normal,
        }
    }

    /// One-character WFDB annotation symbol.
    pub fn symbol(self) -> char {
        match self {
            BeatSymbol::Normal => 'N',
            BeatSymbol::Ventricular => 'V',
            BeatSymbol::Supraventricular => 'S',
        }
    }

    /// MIT annotation type code (`NORMAL`, `PVC`, `SVPB` in `ecgcodes.h`).
    pub fn mit_code(self) -> u16 {
        match self {
            BeatSymbol::Normal => 1,
            BeatSymbol::Ventricular => 5,
            BeatSymbol::Supraventricular => 9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeatAnnotation {
    pub sample: i64,
    pub symbol: BeatSymbol,
    pub label: String,
}

/// Turn the export's QRS list into annotations, keeping input order.
///
/// `Time` is used as the sample index unchanged, without going through the
/// sampling frequency.
pub fn extract_annotations(qrs: &[Qrs]) -> Vec<BeatAnnotation> {
    let annotations: Vec<_> = qrs
        .iter()
        .map(|beat| BeatAnnotation {
            sample: beat.time,
            symbol: BeatSymbol::from_type_code(&beat.type_code),
            label: format!("QRS_{}", beat.number.trim()),
        })
        .collect();
    debug!("Extracted {} QRS annotations.", annotations.len());
    annotations
}
