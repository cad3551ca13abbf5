//! Convert GE MUSE XML resting ECG exports into WFDB records.

pub mod annotations;
pub mod convert;
pub mod ecg_process;
pub mod error;
pub mod lead;
pub mod muse_xml;
pub mod units;
pub mod wfdb_write;

pub use convert::{muse_to_wfdb, ConvertOptions};
pub use error::{ConvertError, Result};
pub use lead::Lead;
