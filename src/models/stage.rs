//! Stage model: a server-declared batch of sections.

use serde::{Deserialize, Serialize};

/// Sections announced together under one stage ordinal.
///
/// Stages are informative groupings for progress reporting; they only
/// seed `pending` sections when first announced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Stage {
    /// 1-based stage number.
    pub ordinal: u32,
    /// Section identifiers belonging to the stage, in announcement order.
    pub section_ids: Vec<String>,
}

impl Stage {
    /// Construct a stage.
    #[must_use]
    pub fn new(ordinal: u32, section_ids: Vec<String>) -> Self {
        Self {
            ordinal,
            section_ids,
        }
    }

    /// Add identifiers not already listed, keeping announcement order.
    pub fn merge(&mut self, section_ids: &[String]) {
        for id in section_ids {
            if !self.section_ids.contains(id) {
                self.section_ids.push(id.clone());
            }
        }
    }
}
