//! Session phase model and its transition table.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque value distinguishing one attempt's messages from those of a
/// superseded attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct GenerationToken(Uuid);

impl GenerationToken {
    /// Generate a fresh, never-before-seen token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GenerationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for GenerationToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Flat status label exposed to consumers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No attempt in progress.
    Idle,
    /// Channel requested, not yet open.
    Connecting,
    /// Channel open, generation not yet started.
    Connected,
    /// Sections are being generated.
    Generating,
    /// Finished with every section completed.
    Complete,
    /// Finished with at least one failed section.
    Partial,
    /// Session-level failure.
    Error,
}

impl SessionStatus {
    /// Whether no further events will be processed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Partial | Self::Error)
    }
}

/// Cause of a session-level failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The server sent an `error` event.
    Server,
    /// The channel closed or failed before a terminal event.
    Transport,
    /// No event arrived within the silence bound.
    Timeout,
}

/// Session-level failure with a human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionFailure {
    /// What went wrong.
    pub kind: FailureKind,
    /// Message shown to the consumer.
    pub message: String,
}

impl SessionFailure {
    /// Construct a failure.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Terminal result reported by the `complete` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GenerationResult {
    /// Persisted artifact identifier.
    pub artifact_id: String,
    /// Artifact version produced by this attempt.
    pub version: u32,
    /// Number of sections in the artifact.
    pub section_count: u32,
    /// Number of sections that failed.
    pub failed_count: u32,
}

/// Input to the phase transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// The channel opened.
    Opened,
    /// The server declared the `generating` phase.
    GenerationStarted,
    /// A stage, chunk or section event arrived.
    SectionActivity,
    /// The server reported the session finished.
    Finished(GenerationResult),
    /// A session-level failure occurred.
    Failed(SessionFailure),
}

/// Session state as a single tagged union.
///
/// Results exist only in `Complete`/`Partial` and failures only in
/// `Error`, so a non-terminal session can never carry either.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SessionPhase {
    /// No attempt in progress.
    #[default]
    Idle,
    /// Channel requested, not yet open.
    Connecting,
    /// Channel open, generation not yet started.
    Connected,
    /// Sections are being generated.
    Generating,
    /// Finished with every section completed.
    Complete(GenerationResult),
    /// Finished with at least one failed section.
    Partial(GenerationResult),
    /// Session-level failure.
    Error(SessionFailure),
}

impl SessionPhase {
    /// Flat status label for this phase.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Idle => SessionStatus::Idle,
            Self::Connecting => SessionStatus::Connecting,
            Self::Connected => SessionStatus::Connected,
            Self::Generating => SessionStatus::Generating,
            Self::Complete(_) => SessionStatus::Complete,
            Self::Partial(_) => SessionStatus::Partial,
            Self::Error(_) => SessionStatus::Error,
        }
    }

    /// Whether an attempt is in flight and accepting events.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Generating)
    }

    /// Terminal result, if any.
    #[must_use]
    pub fn result(&self) -> Option<&GenerationResult> {
        match self {
            Self::Complete(result) | Self::Partial(result) => Some(result),
            _ => None,
        }
    }

    /// Terminal failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&SessionFailure> {
        match self {
            Self::Error(failure) => Some(failure),
            _ => None,
        }
    }

    /// Apply `trigger` to the transition table.
    ///
    /// Returns the next phase, or `None` when the trigger has no effect in
    /// the current phase. `connect`, `cancel` and `retry` are driven by the
    /// controller directly and are not triggers.
    #[must_use]
    pub fn next(&self, trigger: Trigger) -> Option<Self> {
        match (self, trigger) {
            (Self::Connecting, Trigger::Opened) => Some(Self::Connected),
            (
                Self::Connected | Self::Generating,
                Trigger::GenerationStarted | Trigger::SectionActivity,
            ) => Some(Self::Generating),
            (Self::Connected | Self::Generating, Trigger::Finished(result)) => {
                if result.failed_count == 0 {
                    Some(Self::Complete(result))
                } else {
                    Some(Self::Partial(result))
                }
            }
            (phase, Trigger::Failed(failure)) if phase.is_live() => Some(Self::Error(failure)),
            _ => None,
        }
    }
}
