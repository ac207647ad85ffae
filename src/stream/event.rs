//! Typed generation events decoded from SSE frames.
//!
//! Every frame is decoded exactly once, here, into the closed
//! [`GenerationEvent`] enum. Downstream code never touches raw JSON.
//!
//! # Known event names
//!
//! | Event              | Maps to                                   |
//! |--------------------|-------------------------------------------|
//! | `status`           | [`GenerationEvent::Status`]               |
//! | `stage`            | [`GenerationEvent::Stage`]                |
//! | `chunk`            | [`GenerationEvent::Chunk`]                |
//! | `section_complete` | [`GenerationEvent::SectionCompleted`]     |
//! | `section_failed`   | [`GenerationEvent::SectionFailed`]        |
//! | `complete`         | [`GenerationEvent::Complete`]             |
//! | `error`            | [`GenerationEvent::Error`]                |
//! | *(any other)*      | Skipped; logged at `DEBUG`                |
//!
//! When a frame has no `event` field (or the generic `message` name), the
//! `type` field of its JSON data names the event instead.

use serde::Deserialize;
use tracing::debug;

use crate::stream::codec::SseFrame;
use crate::{AppError, Result};

/// Message used when an `error` event carries no readable message.
pub const GENERIC_ERROR_MESSAGE: &str = "generation failed";

/// One section listed in a `stage` announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedSection {
    /// Section identifier.
    pub id: String,
    /// Optional display title announced ahead of completion.
    pub title: Option<String>,
}

/// Authoritative data carried by `section_complete`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletedSection {
    /// Final title; derived from the id when absent.
    pub title: Option<String>,
    /// Final content; the accumulated text is kept when absent.
    pub content: Option<String>,
    /// Final display order; the current order is kept when absent.
    pub order: Option<u32>,
}

/// Closed set of events a generation stream can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// Coarse-grained phase label.
    Status {
        /// Label such as `generating`.
        status: String,
    },
    /// Announces a batch of sections about to generate.
    Stage {
        /// 1-based stage number.
        ordinal: u32,
        /// Sections in the batch.
        sections: Vec<StagedSection>,
    },
    /// Incremental content for one section.
    Chunk {
        /// Target section.
        section_id: String,
        /// Text to append.
        delta: String,
    },
    /// Final data for one section.
    SectionCompleted {
        /// Target section.
        section_id: String,
        /// Authoritative fields.
        section: CompletedSection,
    },
    /// One section failed; the session continues.
    SectionFailed {
        /// Target section.
        section_id: String,
        /// Failure reason.
        error: String,
    },
    /// The session finished.
    Complete {
        /// Persisted artifact identifier.
        artifact_id: String,
        /// Artifact version.
        version: u32,
        /// Server-reported section count, if sent.
        section_count: Option<u32>,
        /// Server-reported failure count, if sent.
        failed_count: Option<u32>,
    },
    /// Unrecoverable session-level failure.
    Error {
        /// Human-readable message.
        message: String,
    },
}

impl GenerationEvent {
    /// Whether the event ends the session.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Wire name of the event, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Stage { .. } => "stage",
            Self::Chunk { .. } => "chunk",
            Self::SectionCompleted { .. } => "section_complete",
            Self::SectionFailed { .. } => "section_failed",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }
}

// ── Wire payloads ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StatusPayload {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StageEntry {
    Id(String),
    Detailed { id: String, title: Option<String> },
}

#[derive(Debug, Deserialize)]
struct StagePayload {
    stage: u32,
    sections: Vec<StageEntry>,
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    section_id: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct SectionCompletePayload {
    section_id: String,
    title: Option<String>,
    content: Option<String>,
    order: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SectionFailedPayload {
    section_id: String,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletePayload {
    artifact_id: String,
    #[serde(default)]
    version: u32,
    section_count: Option<u32>,
    failed_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    event_type: Option<String>,
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Decode one SSE frame into a [`GenerationEvent`].
///
/// # Return value
///
/// - `Ok(Some(event))`: a recognized event with a well-formed payload.
/// - `Ok(None)`: no event name could be resolved, or the name is unknown.
/// - `Err(AppError::Protocol(..))`: a recognized event whose payload is
///   malformed. `error` events never fail: they fall back to
///   [`GENERIC_ERROR_MESSAGE`].
///
/// # Errors
///
/// Returns [`AppError::Protocol`] for malformed payloads of known events.
pub fn parse_frame(frame: &SseFrame) -> Result<Option<GenerationEvent>> {
    let Some(name) = resolve_name(frame) else {
        debug!("event parser: frame without event name, skipping");
        return Ok(None);
    };

    match name.as_str() {
        "status" => {
            let p: StatusPayload = decode(&name, &frame.data)?;
            Ok(Some(GenerationEvent::Status { status: p.status }))
        }
        "stage" => {
            let p: StagePayload = decode(&name, &frame.data)?;
            let sections = p
                .sections
                .into_iter()
                .map(|entry| match entry {
                    StageEntry::Id(id) => StagedSection { id, title: None },
                    StageEntry::Detailed { id, title } => StagedSection { id, title },
                })
                .collect();
            Ok(Some(GenerationEvent::Stage {
                ordinal: p.stage,
                sections,
            }))
        }
        "chunk" => {
            let p: ChunkPayload = decode(&name, &frame.data)?;
            Ok(Some(GenerationEvent::Chunk {
                section_id: p.section_id,
                delta: p.content,
            }))
        }
        "section_complete" => {
            let p: SectionCompletePayload = decode(&name, &frame.data)?;
            Ok(Some(GenerationEvent::SectionCompleted {
                section_id: p.section_id,
                section: CompletedSection {
                    title: p.title,
                    content: p.content,
                    order: p.order,
                },
            }))
        }
        "section_failed" => {
            let p: SectionFailedPayload = decode(&name, &frame.data)?;
            Ok(Some(GenerationEvent::SectionFailed {
                section_id: p.section_id,
                error: p
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "section generation failed".to_owned()),
            }))
        }
        "complete" => {
            let p: CompletePayload = decode(&name, &frame.data)?;
            Ok(Some(GenerationEvent::Complete {
                artifact_id: p.artifact_id,
                version: p.version,
                section_count: p.section_count,
                failed_count: p.failed_count,
            }))
        }
        "error" => Ok(Some(GenerationEvent::Error {
            message: error_message(&frame.data),
        })),
        other => {
            debug!(event = other, "event parser: skipping unknown event");
            Ok(None)
        }
    }
}

// ── Private helpers ──────────────────────────────────────────────────────────

fn resolve_name(frame: &SseFrame) -> Option<String> {
    match frame.event.as_deref() {
        Some(name) if !name.is_empty() && name != "message" => Some(name.to_owned()),
        _ => serde_json::from_str::<TypeProbe>(&frame.data)
            .ok()
            .and_then(|probe| probe.event_type)
            .filter(|name| !name.is_empty()),
    }
}

fn decode<T: serde::de::DeserializeOwned>(name: &str, data: &str) -> Result<T> {
    serde_json::from_str(data)
        .map_err(|e| AppError::Protocol(format!("malformed {name} payload: {e}")))
}

/// Best-effort extraction of an `error` event's message.
fn error_message(data: &str) -> String {
    serde_json::from_str::<ErrorPayload>(data)
        .ok()
        .and_then(|p| p.message.or(p.error))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_owned())
}
