//! Applies section-level events to the in-memory section collection.
//!
//! Status changes only move forward (see
//! [`SectionStatus::can_transition_to`]); content is appended while
//! generating and replaced wholesale on completion. At most one section
//! carries the streaming marker at any time.

use std::collections::HashMap;

use tracing::debug;

use crate::models::section::{title_from_id, Section, SectionStatus};
use crate::models::stage::Stage;
use crate::stream::event::{CompletedSection, StagedSection};

/// Section collection plus the stage log and streaming marker.
#[derive(Debug, Clone, Default)]
pub struct SectionReconciler {
    /// Sections in arrival order.
    sections: Vec<Section>,
    /// Position of each section id in `sections`.
    index: HashMap<String, usize>,
    stages: Vec<Stage>,
    current_stage: Option<u32>,
    streaming_section_id: Option<String>,
}

impl SectionReconciler {
    /// Create an empty reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage and seed `pending` sections for ids not yet present.
    ///
    /// Existing sections are left untouched, so replaying a stage is a
    /// no-op. Returns the number of sections inserted.
    pub fn apply_stage(&mut self, ordinal: u32, sections: &[StagedSection]) -> usize {
        let ids: Vec<String> = sections.iter().map(|s| s.id.clone()).collect();
        match self.stages.iter_mut().find(|s| s.ordinal == ordinal) {
            Some(stage) => stage.merge(&ids),
            None => self.stages.push(Stage::new(ordinal, ids)),
        }
        self.current_stage = Some(ordinal);

        let mut inserted = 0;
        for staged in sections {
            if self.index.contains_key(&staged.id) {
                continue;
            }
            let mut section = Section::new(staged.id.clone(), SectionStatus::Pending);
            if let Some(title) = staged.title.as_ref().filter(|t| !t.trim().is_empty()) {
                section.title.clone_from(title);
            }
            self.insert(section);
            inserted += 1;
        }
        inserted
    }

    /// Append `delta` to a section and mark it as streaming.
    ///
    /// An unknown section is created in `generating` status first. Chunks
    /// for completed or failed sections are ignored. Returns whether the
    /// chunk was applied.
    pub fn apply_chunk(&mut self, section_id: &str, delta: &str) -> bool {
        let section = self.entry(section_id, SectionStatus::Generating);
        if !section.status.can_transition_to(SectionStatus::Generating) {
            debug!(
                section_id,
                status = ?section.status,
                "reconciler: chunk for finished section ignored"
            );
            return false;
        }
        section.status = SectionStatus::Generating;
        section.content.push_str(delta);
        self.streaming_section_id = Some(section_id.to_owned());
        true
    }

    /// Mark a section completed with authoritative data.
    ///
    /// Works from `pending` or `generating`; a repeated completion
    /// overwrites the previous data. Completion of a failed section is
    /// ignored. Returns whether the completion was applied.
    pub fn apply_completed(&mut self, section_id: &str, fields: CompletedSection) -> bool {
        let section = self.entry(section_id, SectionStatus::Pending);
        if !section.status.can_transition_to(SectionStatus::Completed) {
            debug!(
                section_id,
                status = ?section.status,
                "reconciler: completion for failed section ignored"
            );
            return false;
        }
        section.status = SectionStatus::Completed;
        if let Some(content) = fields.content {
            section.content = content;
        }
        if let Some(title) = fields.title.filter(|t| !t.trim().is_empty()) {
            section.title = title;
        } else if section.title.is_empty() {
            section.title = title_from_id(section_id);
        }
        if let Some(order) = fields.order {
            section.order = order;
        }
        section.error = None;
        self.clear_streaming(section_id);
        true
    }

    /// Mark a section failed. Other sections are unaffected.
    ///
    /// Failure of an already completed or failed section is ignored.
    /// Returns whether the failure was applied.
    pub fn apply_failed(&mut self, section_id: &str, error: &str) -> bool {
        let section = self.entry(section_id, SectionStatus::Pending);
        if !section.status.can_transition_to(SectionStatus::Failed) {
            debug!(
                section_id,
                status = ?section.status,
                "reconciler: failure for finished section ignored"
            );
            return false;
        }
        section.status = SectionStatus::Failed;
        section.error = Some(error.to_owned());
        self.clear_streaming(section_id);
        true
    }

    /// Fail every section still `pending` or `generating`.
    ///
    /// Called when the session ends. Returns the number of sections failed.
    pub fn finalize_unfinished(&mut self, reason: &str) -> usize {
        let mut finalized = 0;
        for section in &mut self.sections {
            if !section.status.is_terminal() {
                section.status = SectionStatus::Failed;
                section.error = Some(reason.to_owned());
                finalized += 1;
            }
        }
        self.streaming_section_id = None;
        finalized
    }

    /// Drop all sections, stages and the streaming marker.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Look up a section by id.
    #[must_use]
    pub fn section(&self, id: &str) -> Option<&Section> {
        self.index.get(id).map(|&pos| &self.sections[pos])
    }

    /// Sections in arrival order.
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Sections in display order: by `order`, ties kept in arrival order.
    #[must_use]
    pub fn ordered(&self) -> Vec<Section> {
        let mut ordered = self.sections.clone();
        ordered.sort_by_key(|s| s.order);
        ordered
    }

    /// Stages announced so far, in announcement order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Ordinal of the last announced stage.
    #[must_use]
    pub fn current_stage(&self) -> Option<u32> {
        self.current_stage
    }

    /// Section currently receiving chunks.
    #[must_use]
    pub fn streaming_section_id(&self) -> Option<&str> {
        self.streaming_section_id.as_deref()
    }

    /// Number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Whether no section is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Number of sections in `status`.
    #[must_use]
    pub fn count(&self, status: SectionStatus) -> usize {
        self.sections.iter().filter(|s| s.status == status).count()
    }

    /// Number of sections not yet completed or failed.
    #[must_use]
    pub fn unfinished_count(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| !s.status.is_terminal())
            .count()
    }

    /// Fraction of sections in a final status; `0.0` when empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Section counts are far below 2^52.
    pub fn progress(&self) -> f64 {
        if self.sections.is_empty() {
            return 0.0;
        }
        let finished = self.sections.len() - self.unfinished_count();
        finished as f64 / self.sections.len() as f64
    }

    fn insert(&mut self, section: Section) -> usize {
        let pos = self.sections.len();
        self.index.insert(section.id.clone(), pos);
        self.sections.push(section);
        pos
    }

    /// Existing section, or a new one in `status` when unknown.
    fn entry(&mut self, section_id: &str, status: SectionStatus) -> &mut Section {
        let pos = match self.index.get(section_id) {
            Some(&pos) => pos,
            None => {
                debug!(section_id, "reconciler: section not announced, creating");
                self.insert(Section::new(section_id, status))
            }
        };
        &mut self.sections[pos]
    }

    fn clear_streaming(&mut self, section_id: &str) {
        if self.streaming_section_id.as_deref() == Some(section_id) {
            self.streaming_section_id = None;
        }
    }
}
