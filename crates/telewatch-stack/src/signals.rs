//! Signal dictionary: IOA to human-readable label resolution.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// General interrogation type identification.
const TYPE_GENERAL_INTERROGATION: u8 = 100;
/// Causes under which a type-100 frame is a general interrogation step.
const GI_CAUSES: [u8; 3] = [6, 7, 10];

/// Failure modes when loading a signal list file.
#[derive(Debug, Error)]
pub enum SignalListError {
    /// The file could not be read.
    #[error("signal list not readable: {0}")]
    Storage(#[from] std::io::Error),

    /// The file is not a valid signal list document.
    #[error("signal list not parseable: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One configured data point.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalRow {
    /// Information object address (3-byte composite, already combined).
    pub ioa: u32,
    /// Display text of the data point.
    pub label: String,
    /// ASDU type identification used when replaying this signal.
    pub type_id: u8,
    /// Cause of transmission, defaulting to spontaneous.
    #[serde(default = "default_cause")]
    pub cause: u8,
    /// Value text replayed for this signal.
    #[serde(default)]
    pub value: String,
}

fn default_cause() -> u8 {
    20
}

#[derive(Debug, Deserialize)]
struct SignalListFile {
    #[serde(default)]
    rows: Vec<SignalRow>,
}

/// Externally supplied dictionary mapping IOA values to display labels.
///
/// IOA 0 is the sentinel for "no information object" and never resolves to
/// a mapped label.
#[derive(Debug, Default)]
pub struct SignalDictionary {
    rows: Vec<SignalRow>,
    by_ioa: HashMap<u32, usize>,
}

impl SignalDictionary {
    /// Dictionary without any mapped signals; labels fall back to raw text.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a dictionary from configured rows. Later rows win on
    /// duplicate IOA values.
    #[must_use]
    pub fn from_rows(rows: Vec<SignalRow>) -> Self {
        let mut by_ioa = HashMap::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            if row.ioa != 0 {
                by_ioa.insert(row.ioa, index);
            }
        }
        Self { rows, by_ioa }
    }

    /// Load a signal list document (`{"rows": [...]}`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SignalListError> {
        let raw = std::fs::read_to_string(path)?;
        let file: SignalListFile = serde_json::from_str(&raw)?;
        Ok(Self::from_rows(file.rows))
    }

    /// All configured rows in list order.
    #[must_use]
    pub fn rows(&self) -> &[SignalRow] {
        &self.rows
    }

    /// Row for a non-sentinel IOA, if mapped.
    #[must_use]
    pub fn row_for(&self, ioa: u32) -> Option<&SignalRow> {
        if ioa == 0 {
            return None;
        }
        self.by_ioa.get(&ioa).map(|index| &self.rows[*index])
    }

    /// Resolve the display label for an observed I-frame.
    ///
    /// Mapped IOA wins; otherwise a general interrogation gets its fixed
    /// label and everything else falls back to the raw type tag.
    #[must_use]
    pub fn resolve_label(&self, ioa: u32, type_id: u8, cause: u8) -> String {
        if let Some(row) = self.row_for(ioa) {
            return row.label.clone();
        }
        if type_id == TYPE_GENERAL_INTERROGATION && GI_CAUSES.contains(&cause) {
            return "GENERALABFRAGE".to_string();
        }
        format!("TYPE {type_id}")
    }
}
