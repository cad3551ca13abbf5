use std::str::FromStr;

use crate::error::{ConvertError, Result};

/// Amplitude unit reported by MUSE for a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmplitudeUnit {
    Microvolts,
    Millivolts,
    Volts,
}

impl AmplitudeUnit {
    /// Multiplicative factor converting this unit to millivolts.
    pub fn to_millivolts(self) -> f64 {
        match self {
            AmplitudeUnit::Microvolts => 0.001,
            AmplitudeUnit::Millivolts => 1.0,
            AmplitudeUnit::Volts => 1000.0,
        }
    }
}

impl FromStr for AmplitudeUnit {
    type Err = ConvertError;

    fn from_str(label: &str) -> Result<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "MICROVOLTS" => Ok(AmplitudeUnit::Microvolts),
            "MILLIVOLTS" => Ok(AmplitudeUnit::Millivolts),
            "VOLTS" => Ok(AmplitudeUnit::Volts),
            _ => Err(ConvertError::UnknownUnit(label.to_string())),
        }
    }
}

/// Scale factor to millivolts for a raw unit label.
pub fn unit_scale(label: &str) -> Result<f64> {
    Ok(label.parse::<AmplitudeUnit>()?.to_millivolts())
}
