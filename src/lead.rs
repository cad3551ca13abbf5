use std::fmt;

/// Number of leads in a standard 12-lead ECG.
pub const LEAD_COUNT: usize = 12;

/// The canonical 12-lead set. Declaration order is the column order of the
/// exported signal matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lead {
    I,
    II,
    III,
    AVR,
    AVL,
    AVF,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
}

impl Lead {
    pub const ALL: [Lead; LEAD_COUNT] = [
        Lead::I,
        Lead::II,
        Lead::III,
        Lead::AVR,
        Lead::AVL,
        Lead::AVF,
        Lead::V1,
        Lead::V2,
        Lead::V3,
        Lead::V4,
        Lead::V5,
        Lead::V6,
    ];

    /// Signal name written to the WFDB header.
    pub fn name(self) -> &'static str {
        match self {
            Lead::I => "I",
            Lead::II => "II",
            Lead::III => "III",
            Lead::AVR => "aVR",
            Lead::AVL => "aVL",
            Lead::AVF => "aVF",
            Lead::V1 => "V1",
            Lead::V2 => "V2",
            Lead::V3 => "V3",
            Lead::V4 => "V4",
            Lead::V5 => "V5",
            Lead::V6 => "V6",
        }
    }

    /// Match a vendor `LeadID`, ignoring surrounding whitespace and case.
    pub fn from_id(id: &str) -> Option<Lead> {
        let id = id.trim().to_ascii_uppercase();
        Lead::ALL
            .into_iter()
            .find(|lead| lead.name().to_ascii_uppercase() == id)
    }

    /// Column index in the signal matrix.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Lead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
