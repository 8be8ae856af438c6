//! Expected scan categories and per-subject presence vectors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scan categories the study expects for every subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanCategory {
    /// Hippocampal high-resolution T2 (`acq-hippo`).
    Hippocampus,
    /// Diffusion-weighted imaging.
    Dwi,
    /// Resting-state BOLD.
    RestingState,
    /// Think-aloud task BOLD.
    ThinkAloud,
    /// Mind's-eye task BOLD.
    MindsEye,
}

impl ScanCategory {
    pub const COUNT: usize = 5;

    pub const ALL: [ScanCategory; Self::COUNT] = [
        ScanCategory::Hippocampus,
        ScanCategory::Dwi,
        ScanCategory::RestingState,
        ScanCategory::ThinkAloud,
        ScanCategory::MindsEye,
    ];

    /// Column name in the presence table.
    pub fn column(self) -> &'static str {
        match self {
            ScanCategory::Hippocampus => "hippocampus",
            ScanCategory::Dwi => "dwi",
            ScanCategory::RestingState => "resting_state",
            ScanCategory::ThinkAloud => "think_aloud",
            ScanCategory::MindsEye => "minds_eye",
        }
    }

    pub fn from_column(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.column() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ScanCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Which categories have at least one file anywhere under a subject's tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresenceVector([bool; ScanCategory::COUNT]);

impl PresenceVector {
    pub fn is_present(&self, category: ScanCategory) -> bool {
        self.0[category.index()]
    }

    pub fn mark(&mut self, category: ScanCategory) {
        self.0[category.index()] = true;
    }

    pub fn all_present(&self) -> bool {
        self.0.iter().all(|p| *p)
    }

    /// Missing categories in canonical order.
    pub fn missing(&self) -> Vec<ScanCategory> {
        ScanCategory::ALL
            .into_iter()
            .filter(|c| !self.is_present(*c))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScanCategory, bool)> + '_ {
        ScanCategory::ALL.into_iter().map(|c| (c, self.is_present(c)))
    }
}
