//! Generation request parameters.

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Depth of the generated document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Short first pass.
    Draft,
    /// Full-length document.
    Detailed,
}

impl GenerationMode {
    /// Wire value used in the `mode` query parameter.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Detailed => "detailed",
        }
    }
}

/// How the server batches section generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// Sections stream one after another without stage announcements.
    #[default]
    SinglePass,
    /// Sections are announced and generated in stages.
    Staged,
}

/// Parameters of one generation channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum GenerationRequest {
    /// Generate a whole document for a project.
    Document {
        /// Project the document belongs to.
        project_id: String,
        /// Requested depth.
        mode: GenerationMode,
        /// Single-pass or staged generation.
        #[serde(default)]
        pipeline: Pipeline,
    },
    /// Regenerate one section of an existing artifact.
    RegenerateSection {
        /// Artifact holding the section.
        artifact_id: String,
        /// Section to regenerate.
        section_id: String,
        /// Optional operator guidance for the regeneration.
        instructions: Option<String>,
    },
}

impl GenerationRequest {
    /// Validate that all required identifiers are present.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRequest` naming the first empty field.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Document { project_id, .. } => require("project_id", project_id),
            Self::RegenerateSection {
                artifact_id,
                section_id,
                ..
            } => {
                require("artifact_id", artifact_id)?;
                require("section_id", section_id)
            }
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidRequest(format!("{field} must not be empty")));
    }
    Ok(())
}
