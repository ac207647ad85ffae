//! Unit tests for the section model and its status rules.

use docgen_stream::models::section::{title_from_id, Section, SectionStatus};
use docgen_stream::models::stage::Stage;

#[test]
fn forward_transitions_are_allowed() {
    use SectionStatus::{Completed, Failed, Generating, Pending};

    assert!(Pending.can_transition_to(Generating));
    assert!(Pending.can_transition_to(Completed));
    assert!(Pending.can_transition_to(Failed));
    assert!(Generating.can_transition_to(Generating));
    assert!(Generating.can_transition_to(Completed));
    assert!(Generating.can_transition_to(Failed));
    assert!(Completed.can_transition_to(Completed), "replayed completion");
}

#[test]
fn backward_transitions_are_rejected() {
    use SectionStatus::{Completed, Failed, Generating, Pending};

    for from in [Generating, Completed, Failed] {
        assert!(!from.can_transition_to(Pending), "{from:?} -> pending");
    }
    assert!(!Completed.can_transition_to(Generating));
    assert!(!Completed.can_transition_to(Failed));
    for next in [Pending, Generating, Completed, Failed] {
        assert!(!Failed.can_transition_to(next), "failed -> {next:?}");
    }
}

#[test]
fn terminal_statuses() {
    assert!(!SectionStatus::Pending.is_terminal());
    assert!(!SectionStatus::Generating.is_terminal());
    assert!(SectionStatus::Completed.is_terminal());
    assert!(SectionStatus::Failed.is_terminal());
}

#[test]
fn title_is_derived_from_id() {
    assert_eq!(title_from_id("executive_summary"), "Executive Summary");
    assert_eq!(title_from_id("risk-register"), "Risk Register");
    assert_eq!(title_from_id("overview"), "Overview");
    assert_eq!(title_from_id("__"), "");
}

#[test]
fn new_section_is_empty() {
    let section = Section::new("user_stories", SectionStatus::Pending);
    assert_eq!(section.title, "User Stories");
    assert!(section.content.is_empty());
    assert_eq!(section.order, 0);
    assert!(section.error.is_none());
}

#[test]
fn section_status_serializes_snake_case() {
    let json = serde_json::to_string(&SectionStatus::Generating).expect("serialize");
    assert_eq!(json, "\"generating\"");
}

#[test]
fn stage_merge_keeps_order_and_skips_duplicates() {
    let mut stage = Stage::new(1, vec!["a".into(), "b".into()]);
    stage.merge(&["b".into(), "c".into()]);
    assert_eq!(stage.section_ids, vec!["a", "b", "c"]);
}
