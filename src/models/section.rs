//! Section model and status transition rules.

use serde::{Deserialize, Serialize};

/// Lifecycle status for one generated section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    /// Announced by a stage, no content yet.
    Pending,
    /// Receiving content chunks.
    Generating,
    /// Final content delivered.
    Completed,
    /// Generation failed for this section only.
    Failed,
}

impl SectionStatus {
    /// Whether the section has reached a final status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Determine whether a status transition is permitted.
    ///
    /// Transitions only move forward. `Completed → Completed` is allowed so
    /// that a replayed completion can overwrite the section's data.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Generating | Self::Completed | Self::Failed)
                | (Self::Generating, Self::Generating | Self::Completed | Self::Failed)
                | (Self::Completed, Self::Completed)
        )
    }
}

/// One independently generated sub-unit of the final document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Section {
    /// Identifier, unique within a session.
    pub id: String,
    /// Current lifecycle status.
    pub status: SectionStatus,
    /// Accumulated text.
    pub content: String,
    /// Display name.
    pub title: String,
    /// Display ordering; authoritative only once completed.
    pub order: u32,
    /// Failure reason; present only when `status == Failed`.
    pub error: Option<String>,
}

impl Section {
    /// Construct an empty section in the given status.
    #[must_use]
    pub fn new(id: impl Into<String>, status: SectionStatus) -> Self {
        let id = id.into();
        let title = title_from_id(&id);
        Self {
            id,
            status,
            content: String::new(),
            title,
            order: 0,
            error: None,
        }
    }
}

/// Derive a display title from a section identifier.
///
/// `executive_summary` and `executive-summary` both become
/// `Executive Summary`.
#[must_use]
pub fn title_from_id(id: &str) -> String {
    id.split(['_', '-', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
