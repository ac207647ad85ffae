//! Unit tests for the section reconciler.
//!
//! Covers stage seeding, chunk accumulation, completion overwrite rules,
//! per-section failures, the streaming marker and end-of-session
//! finalisation.

use docgen_stream::models::section::SectionStatus;
use docgen_stream::session::reconciler::SectionReconciler;
use docgen_stream::stream::event::{CompletedSection, StagedSection};

fn staged(ids: &[&str]) -> Vec<StagedSection> {
    ids.iter()
        .map(|id| StagedSection {
            id: (*id).to_owned(),
            title: None,
        })
        .collect()
}

fn completed(content: &str, order: u32) -> CompletedSection {
    CompletedSection {
        title: None,
        content: Some(content.to_owned()),
        order: Some(order),
    }
}

// ── Stages ───────────────────────────────────────────────────────────────────

#[test]
fn stage_seeds_pending_sections() {
    let mut rec = SectionReconciler::new();
    let inserted = rec.apply_stage(1, &staged(&["s1", "s2"]));

    assert_eq!(inserted, 2);
    assert_eq!(rec.len(), 2);
    assert_eq!(rec.current_stage(), Some(1));
    assert!(rec
        .sections()
        .iter()
        .all(|s| s.status == SectionStatus::Pending));
}

#[test]
fn stage_replay_leaves_existing_sections_untouched() {
    let mut rec = SectionReconciler::new();
    rec.apply_stage(1, &staged(&["s1"]));
    rec.apply_chunk("s1", "text");

    let inserted = rec.apply_stage(1, &staged(&["s1", "s2"]));

    assert_eq!(inserted, 1);
    let s1 = rec.section("s1").expect("s1");
    assert_eq!(s1.status, SectionStatus::Generating);
    assert_eq!(s1.content, "text");
    assert_eq!(rec.stages().len(), 1);
    assert_eq!(rec.stages()[0].section_ids, vec!["s1", "s2"]);
}

#[test]
fn stage_titles_are_used_when_given() {
    let mut rec = SectionReconciler::new();
    rec.apply_stage(
        2,
        &[StagedSection {
            id: "exec".into(),
            title: Some("Executive Summary".into()),
        }],
    );

    assert_eq!(rec.section("exec").expect("exec").title, "Executive Summary");
    assert_eq!(rec.current_stage(), Some(2));
}

// ── Chunks ───────────────────────────────────────────────────────────────────

#[test]
fn chunks_append_in_order() {
    let mut rec = SectionReconciler::new();
    rec.apply_stage(1, &staged(&["s1"]));

    assert!(rec.apply_chunk("s1", "Foo"));
    assert!(rec.apply_chunk("s1", " Bar"));

    let s1 = rec.section("s1").expect("s1");
    assert_eq!(s1.content, "Foo Bar");
    assert_eq!(s1.status, SectionStatus::Generating);
    assert_eq!(rec.streaming_section_id(), Some("s1"));
}

#[test]
fn chunk_for_unknown_section_creates_it() {
    let mut rec = SectionReconciler::new();

    assert!(rec.apply_chunk("late", "x"));

    let late = rec.section("late").expect("created");
    assert_eq!(late.status, SectionStatus::Generating);
    assert_eq!(late.title, "Late");
}

#[test]
fn chunk_for_finished_section_is_ignored() {
    let mut rec = SectionReconciler::new();
    rec.apply_completed("s1", completed("final", 0));
    rec.apply_failed("s2", "nope");

    assert!(!rec.apply_chunk("s1", "more"));
    assert!(!rec.apply_chunk("s2", "more"));

    assert_eq!(rec.section("s1").expect("s1").content, "final");
    assert_eq!(rec.section("s1").expect("s1").status, SectionStatus::Completed);
    assert_eq!(rec.section("s2").expect("s2").status, SectionStatus::Failed);
    assert_eq!(rec.streaming_section_id(), None);
}

#[test]
fn streaming_marker_moves_between_sections() {
    let mut rec = SectionReconciler::new();
    rec.apply_chunk("s1", "a");
    rec.apply_chunk("s2", "b");
    assert_eq!(rec.streaming_section_id(), Some("s2"));

    // Completing a section that is not streaming leaves the marker alone.
    rec.apply_completed("s1", completed("a", 0));
    assert_eq!(rec.streaming_section_id(), Some("s2"));

    rec.apply_completed("s2", completed("b", 1));
    assert_eq!(rec.streaming_section_id(), None);
}

// ── Completion and failure ───────────────────────────────────────────────────

#[test]
fn completion_replaces_content() {
    let mut rec = SectionReconciler::new();
    rec.apply_chunk("s1", "draft text");

    assert!(rec.apply_completed(
        "s1",
        CompletedSection {
            title: Some("Title A".into()),
            content: Some("Foo Bar".into()),
            order: Some(3),
        }
    ));

    let s1 = rec.section("s1").expect("s1");
    assert_eq!(s1.status, SectionStatus::Completed);
    assert_eq!(s1.content, "Foo Bar");
    assert_eq!(s1.title, "Title A");
    assert_eq!(s1.order, 3);
}

#[test]
fn completion_without_content_keeps_accumulated_text() {
    let mut rec = SectionReconciler::new();
    rec.apply_stage(
        1,
        &[StagedSection {
            id: "s1".into(),
            title: Some("Announced".into()),
        }],
    );
    rec.apply_chunk("s1", "streamed");

    rec.apply_completed("s1", CompletedSection::default());

    let s1 = rec.section("s1").expect("s1");
    assert_eq!(s1.content, "streamed");
    assert_eq!(s1.title, "Announced", "announced title survives");
}

#[test]
fn duplicate_completion_is_last_write_wins() {
    let mut rec = SectionReconciler::new();
    rec.apply_completed("s1", completed("first", 0));

    assert!(rec.apply_completed("s1", completed("second", 5)));

    let s1 = rec.section("s1").expect("s1");
    assert_eq!(s1.content, "second");
    assert_eq!(s1.order, 5);
    assert_eq!(rec.len(), 1);
}

#[test]
fn completion_of_failed_section_is_ignored() {
    let mut rec = SectionReconciler::new();
    rec.apply_failed("s1", "LLM timeout");

    assert!(!rec.apply_completed("s1", completed("late", 0)));

    let s1 = rec.section("s1").expect("s1");
    assert_eq!(s1.status, SectionStatus::Failed);
    assert_eq!(s1.error.as_deref(), Some("LLM timeout"));
}

#[test]
fn failure_only_affects_its_section() {
    let mut rec = SectionReconciler::new();
    rec.apply_stage(1, &staged(&["s1", "s2"]));
    rec.apply_chunk("s1", "partial");

    assert!(rec.apply_failed("s1", "LLM timeout"));

    assert_eq!(rec.section("s1").expect("s1").status, SectionStatus::Failed);
    assert_eq!(rec.section("s1").expect("s1").content, "partial");
    assert_eq!(rec.section("s2").expect("s2").status, SectionStatus::Pending);
    assert_eq!(rec.streaming_section_id(), None);
}

#[test]
fn first_failure_wins() {
    let mut rec = SectionReconciler::new();
    rec.apply_failed("s1", "first");

    assert!(!rec.apply_failed("s1", "second"));

    assert_eq!(rec.section("s1").expect("s1").error.as_deref(), Some("first"));
}

#[test]
fn failure_of_completed_section_is_ignored() {
    let mut rec = SectionReconciler::new();
    rec.apply_completed("s1", completed("done", 0));

    assert!(!rec.apply_failed("s1", "late"));
    assert_eq!(rec.section("s1").expect("s1").status, SectionStatus::Completed);
}

// ── Aggregates ───────────────────────────────────────────────────────────────

#[test]
fn ordered_sorts_by_order_then_arrival() {
    let mut rec = SectionReconciler::new();
    rec.apply_completed("c", completed("", 2));
    rec.apply_completed("a", completed("", 0));
    rec.apply_completed("b1", completed("", 1));
    rec.apply_completed("b2", completed("", 1));

    let ids: Vec<String> = rec.ordered().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["a", "b1", "b2", "c"]);
}

#[test]
fn finalize_fails_unfinished_sections() {
    let mut rec = SectionReconciler::new();
    rec.apply_stage(1, &staged(&["s1", "s2", "s3"]));
    rec.apply_chunk("s1", "a");
    rec.apply_completed("s3", completed("c", 2));

    let finalized = rec.finalize_unfinished("stream ended");

    assert_eq!(finalized, 2);
    assert_eq!(rec.unfinished_count(), 0);
    assert_eq!(rec.count(SectionStatus::Failed), 2);
    assert_eq!(
        rec.section("s2").expect("s2").error.as_deref(),
        Some("stream ended")
    );
    assert_eq!(rec.streaming_section_id(), None);
}

#[test]
fn progress_counts_finished_sections() {
    let mut rec = SectionReconciler::new();
    assert!(rec.progress().abs() < f64::EPSILON);

    rec.apply_stage(1, &staged(&["s1", "s2", "s3", "s4"]));
    rec.apply_completed("s1", completed("", 0));
    rec.apply_failed("s2", "x");

    assert!((rec.progress() - 0.5).abs() < f64::EPSILON);
}

#[test]
fn clear_resets_everything() {
    let mut rec = SectionReconciler::new();
    rec.apply_stage(1, &staged(&["s1"]));
    rec.apply_chunk("s1", "a");

    rec.clear();

    assert!(rec.is_empty());
    assert!(rec.stages().is_empty());
    assert_eq!(rec.current_stage(), None);
    assert_eq!(rec.streaming_section_id(), None);
    assert!(rec.section("s1").is_none());
}
