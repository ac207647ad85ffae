//! Session controller: the single-threaded state machine over one attempt.
//!
//! The controller owns the session phase, the section reconciler and the
//! live attempt. All inbound traffic (channel events, transport failures,
//! silence timeouts) arrives as [`Inbound`] messages on one queue and is
//! applied one message at a time, in arrival order. Messages stamped with
//! any token other than the live attempt's are dropped. A silence timeout
//! that fired before an already applied message of the same attempt is
//! stale: the timer is re-armed instead of failing the session.
//!
//! Observers read state through [`SessionController::snapshot`] or a
//! [`watch`] subscription; neither blocks the controller.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::models::request::GenerationRequest;
use crate::models::section::{Section, SectionStatus};
use crate::models::session::{
    FailureKind, GenerationResult, GenerationToken, SessionFailure, SessionPhase, SessionStatus,
    Trigger,
};
use crate::models::stage::Stage;
use crate::session::attempt::{ActiveAttempt, AttemptSlot};
use crate::session::reconciler::SectionReconciler;
use crate::stream::channel::{EventSource, Inbound, Signal};
use crate::stream::event::GenerationEvent;
use crate::{AppError, Result};

/// Status label that moves a connected session into `generating`.
pub const GENERATING_LABEL: &str = "generating";

/// Tunables for a [`SessionController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Silence bound before a live session fails with a timeout.
    pub silence_timeout: Duration,
    /// Largest accepted SSE line or frame.
    pub max_frame_bytes: usize,
    /// Capacity of the inbound message queue.
    pub inbox_capacity: usize,
}

impl ControllerSettings {
    /// Derive settings from the stream configuration.
    #[must_use]
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            silence_timeout: config.silence_timeout(),
            max_frame_bytes: config.max_frame_bytes,
            inbox_capacity: config.inbox_capacity.max(1),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

/// Read-only view of a session at one instant.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SessionSnapshot {
    /// Token of the most recent attempt.
    pub token: Option<GenerationToken>,
    /// Parameters of the most recent attempt.
    pub request: Option<GenerationRequest>,
    /// Flat session status.
    pub status: SessionStatus,
    /// Last coarse phase label sent by the server.
    pub phase_label: Option<String>,
    /// Last announced stage ordinal.
    pub current_stage: Option<u32>,
    /// Section currently receiving chunks.
    pub streaming_section_id: Option<String>,
    /// Sections in display order.
    pub sections: Vec<Section>,
    /// Stages announced so far.
    pub stages: Vec<Stage>,
    /// Number of completed sections.
    pub completed_count: usize,
    /// Number of failed sections.
    pub failed_count: usize,
    /// Fraction of sections in a final status.
    pub progress: f64,
    /// Session-level failure, when `status == Error`.
    pub failure: Option<SessionFailure>,
    /// Terminal result, when `status` is `Complete` or `Partial`.
    pub result: Option<GenerationResult>,
    /// When the most recent attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the state last changed.
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Human-readable failure message, when `status == Error`.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.message.as_str())
    }

    /// Look up a section by id.
    #[must_use]
    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// Section ids in display order.
    #[must_use]
    pub fn section_ids(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.id.as_str()).collect()
    }
}

/// Top-level state machine for one consumer.
pub struct SessionController {
    source: Arc<dyn EventSource>,
    settings: ControllerSettings,
    phase: SessionPhase,
    reconciler: SectionReconciler,
    phase_label: Option<String>,
    request: Option<GenerationRequest>,
    token: Option<GenerationToken>,
    started_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    /// When the last non-timeout message of the live attempt was applied.
    last_activity: Option<Instant>,
    attempt: AttemptSlot,
    inbox_tx: mpsc::Sender<Inbound>,
    inbox_rx: mpsc::Receiver<Inbound>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    /// Create an idle controller consuming streams from `source`.
    #[must_use]
    pub fn new(source: Arc<dyn EventSource>, settings: ControllerSettings) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(settings.inbox_capacity.max(1));
        let controller = Self {
            source,
            settings,
            phase: SessionPhase::Idle,
            reconciler: SectionReconciler::new(),
            phase_label: None,
            request: None,
            token: None,
            started_at: None,
            updated_at: Utc::now(),
            last_activity: None,
            attempt: AttemptSlot::default(),
            inbox_tx,
            inbox_rx,
            snapshot_tx: watch::Sender::new(SessionSnapshot::empty()),
        };
        controller.publish();
        controller
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Start a new attempt for `request`.
    ///
    /// Any live attempt is torn down and all previous session data is
    /// discarded before the new channel opens. Must be called from within a
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRequest` if required parameters are absent;
    /// the session is left untouched in that case.
    pub fn connect(&mut self, request: GenerationRequest) -> Result<GenerationToken> {
        request.validate()?;

        self.attempt.tear_down("superseded by connect");
        self.discard();

        let token = GenerationToken::new();
        let attempt = ActiveAttempt::start(
            Arc::clone(&self.source),
            request.clone(),
            token,
            &self.inbox_tx,
            self.settings.silence_timeout,
            self.settings.max_frame_bytes,
        );
        self.attempt.install(attempt);

        self.request = Some(request);
        self.token = Some(token);
        self.started_at = Some(Utc::now());
        self.set_phase(SessionPhase::Connecting);
        info!(%token, "generation session connecting");
        Ok(token)
    }

    /// Abort the current attempt and return to `idle` without a result.
    ///
    /// Sections stay readable. Messages of the aborted attempt that are
    /// still in flight are dropped when they arrive.
    pub fn cancel(&mut self) {
        let was_live = self.attempt.tear_down("cancelled");
        self.drain_stale();
        if was_live || self.phase != SessionPhase::Idle {
            info!(token = ?self.token, "generation session cancelled");
        }
        self.set_phase(SessionPhase::Idle);
    }

    /// Cancel, discard everything, and connect again with the last request.
    ///
    /// Observers see `idle` with no sections before `connecting`: the
    /// cleared snapshot is published and the task yields once before the
    /// new attempt starts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRequest` if no attempt was ever started.
    pub async fn retry(&mut self) -> Result<GenerationToken> {
        let request = self
            .request
            .clone()
            .ok_or_else(|| AppError::InvalidRequest("no previous request to retry".into()))?;

        self.cancel();
        self.discard();
        self.publish();
        tokio::task::yield_now().await;
        info!("retrying generation session");
        self.connect(request)
    }

    /// Apply one inbound message.
    ///
    /// Returns `false` when the message was dropped because it does not
    /// belong to the live attempt.
    pub fn handle(&mut self, inbound: Inbound) -> bool {
        if !self.attempt.accepts(inbound.token) {
            debug!(
                token = %inbound.token,
                live = ?self.attempt.token(),
                "dropping message for a superseded attempt"
            );
            return false;
        }
        self.attempt.touch();
        if !matches!(inbound.signal, Signal::Timeout { .. }) {
            self.last_activity = Some(Instant::now());
        }

        match inbound.signal {
            Signal::Opened => {
                if self.transition(Trigger::Opened) {
                    info!(token = %inbound.token, "generation channel opened");
                }
            }
            Signal::Event(event) => self.apply_event(event),
            Signal::TransportError(reason) => {
                self.fail(SessionFailure::new(FailureKind::Transport, reason));
            }
            Signal::Timeout { fired_at } => {
                if self.last_activity.is_some_and(|at| at >= fired_at) {
                    debug!(token = %inbound.token, "silence timeout overtaken by queued messages");
                    self.attempt.rearm();
                    return true;
                }
                let secs = self.settings.silence_timeout.as_secs();
                self.fail(SessionFailure::new(
                    FailureKind::Timeout,
                    format!("generation timed out: no events received for {secs}s"),
                ));
            }
        }

        self.publish();
        true
    }

    /// Wait for and apply the next inbound message.
    ///
    /// Returns `false` immediately when no attempt is live.
    pub async fn step(&mut self) -> bool {
        if !self.attempt.is_live() {
            self.drain_stale();
            return false;
        }
        match self.inbox_rx.recv().await {
            Some(inbound) => {
                self.handle(inbound);
                true
            }
            None => false,
        }
    }

    /// Apply messages until the session is no longer live.
    pub async fn run_until_settled(&mut self) -> SessionSnapshot {
        while self.step().await {}
        self.snapshot()
    }

    // ── Read access ──────────────────────────────────────────────────────────

    /// Current flat status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.phase.status()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    /// Token of the live attempt, if any.
    #[must_use]
    pub fn live_token(&self) -> Option<GenerationToken> {
        self.attempt.token()
    }

    /// Section state.
    #[must_use]
    pub fn reconciler(&self) -> &SectionReconciler {
        &self.reconciler
    }

    /// Build a snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            token: self.token,
            request: self.request.clone(),
            status: self.phase.status(),
            phase_label: self.phase_label.clone(),
            current_stage: self.reconciler.current_stage(),
            streaming_section_id: self.reconciler.streaming_section_id().map(str::to_owned),
            sections: self.reconciler.ordered(),
            stages: self.reconciler.stages().to_vec(),
            completed_count: self.reconciler.count(SectionStatus::Completed),
            failed_count: self.reconciler.count(SectionStatus::Failed),
            progress: self.reconciler.progress(),
            failure: self.phase.failure().cloned(),
            result: self.phase.result().cloned(),
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }

    /// Subscribe to snapshots published after every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn apply_event(&mut self, event: GenerationEvent) {
        debug!(event = event.name(), "applying generation event");
        match event {
            GenerationEvent::Status { status } => {
                if status == GENERATING_LABEL {
                    self.transition(Trigger::GenerationStarted);
                }
                self.phase_label = Some(status);
            }
            GenerationEvent::Stage { ordinal, sections } => {
                if self.transition(Trigger::SectionActivity) {
                    let inserted = self.reconciler.apply_stage(ordinal, &sections);
                    info!(stage = ordinal, inserted, "stage announced");
                }
            }
            GenerationEvent::Chunk { section_id, delta } => {
                if self.transition(Trigger::SectionActivity) {
                    self.reconciler.apply_chunk(&section_id, &delta);
                }
            }
            GenerationEvent::SectionCompleted {
                section_id,
                section,
            } => {
                if self.transition(Trigger::SectionActivity)
                    && self.reconciler.apply_completed(&section_id, section)
                {
                    info!(section_id, "section completed");
                }
            }
            GenerationEvent::SectionFailed { section_id, error } => {
                if self.transition(Trigger::SectionActivity)
                    && self.reconciler.apply_failed(&section_id, &error)
                {
                    warn!(section_id, error, "section failed");
                }
            }
            GenerationEvent::Complete {
                artifact_id,
                version,
                section_count,
                failed_count,
            } => self.finish(artifact_id, version, section_count, failed_count),
            GenerationEvent::Error { message } => {
                self.fail(SessionFailure::new(FailureKind::Server, message));
            }
        }
    }

    fn finish(
        &mut self,
        artifact_id: String,
        version: u32,
        section_count: Option<u32>,
        failed_count: Option<u32>,
    ) {
        let unfinished = self.reconciler.unfinished_count();
        let local_failed = self.reconciler.count(SectionStatus::Failed) + unfinished;
        let local_failed = u32::try_from(local_failed).unwrap_or(u32::MAX);
        let mut failed_count = failed_count.unwrap_or(local_failed);
        if unfinished > 0 {
            failed_count = failed_count.max(local_failed);
        }
        let result = GenerationResult {
            artifact_id,
            version,
            section_count: section_count
                .unwrap_or_else(|| u32::try_from(self.reconciler.len()).unwrap_or(u32::MAX)),
            failed_count,
        };

        let Some(next) = self.phase.next(Trigger::Finished(result)) else {
            debug!(status = ?self.phase.status(), "complete event ignored");
            return;
        };
        self.reconciler
            .finalize_unfinished("section did not finish before generation completed");
        info!(status = ?next.status(), "generation session finished");
        self.set_phase(next);
        self.attempt.tear_down("finished");
    }

    fn fail(&mut self, failure: SessionFailure) {
        let Some(next) = self.phase.next(Trigger::Failed(failure)) else {
            return;
        };
        if let Some(failure) = next.failure() {
            warn!(kind = ?failure.kind, error = %failure.message, "generation session failed");
            let reason = format!("generation ended: {}", failure.message);
            self.reconciler.finalize_unfinished(&reason);
        }
        self.set_phase(next);
        self.attempt.tear_down("failed");
    }

    /// Apply `trigger`; returns whether the phase table accepted it.
    fn transition(&mut self, trigger: Trigger) -> bool {
        match self.phase.next(trigger) {
            Some(next) => {
                self.set_phase(next);
                true
            }
            None => {
                debug!(status = ?self.phase.status(), "trigger ignored in current phase");
                false
            }
        }
    }

    fn set_phase(&mut self, next: SessionPhase) {
        if self.phase.status() != next.status() {
            debug!(from = ?self.phase.status(), to = ?next.status(), "session phase change");
        }
        self.phase = next;
        self.updated_at = Utc::now();
        self.publish();
    }

    /// Forget every trace of previous attempts.
    fn discard(&mut self) {
        self.reconciler.clear();
        self.phase = SessionPhase::Idle;
        self.phase_label = None;
        self.started_at = None;
        self.updated_at = Utc::now();
        self.last_activity = None;
        self.drain_stale();
    }

    /// Drop queued messages; only valid while no attempt is live.
    fn drain_stale(&mut self) {
        let mut dropped = 0usize;
        while self.inbox_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "dropped messages of superseded attempts");
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

impl SessionSnapshot {
    fn empty() -> Self {
        Self {
            token: None,
            request: None,
            status: SessionStatus::Idle,
            phase_label: None,
            current_stage: None,
            streaming_section_id: None,
            sections: Vec::new(),
            stages: Vec::new(),
            completed_count: 0,
            failed_count: 0,
            progress: 0.0,
            failure: None,
            result: None,
            started_at: None,
            updated_at: Utc::now(),
        }
    }
}
