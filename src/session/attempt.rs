//! Scoped ownership of one attempt's channel and timer.
//!
//! An [`ActiveAttempt`] owns the live [`Channel`] and [`TimeoutHandle`] of a
//! generation attempt; both are released when it is torn down or dropped,
//! whichever exit path is taken. [`AttemptSlot`] holds at most one attempt
//! and always tears the old one down before installing the next, so two
//! attempts are never live together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::models::request::GenerationRequest;
use crate::models::session::GenerationToken;
use crate::session::timeout::{TimeoutHandle, TimeoutMonitor};
use crate::stream::channel::{Channel, ChannelSink, EventSource, Inbound, Signal};

/// Channel and timer of one generation attempt.
#[derive(Debug)]
pub struct ActiveAttempt {
    token: GenerationToken,
    channel: Channel,
    timer: TimeoutHandle,
    inbox: mpsc::Sender<Inbound>,
    silence_timeout: Duration,
}

impl ActiveAttempt {
    /// Arm the silence timer and open the channel for `request`.
    ///
    /// Both deliver into `inbox` stamped with `token`. Must be called from
    /// within a tokio runtime.
    #[must_use]
    pub fn start(
        source: Arc<dyn EventSource>,
        request: GenerationRequest,
        token: GenerationToken,
        inbox: &mpsc::Sender<Inbound>,
        silence_timeout: Duration,
        max_frame_bytes: usize,
    ) -> Self {
        let timer = arm_timer(token, inbox, silence_timeout);
        let channel = Channel::open(
            source,
            request,
            ChannelSink::new(token, inbox.clone()),
            max_frame_bytes,
        );
        Self {
            token,
            channel,
            timer,
            inbox: inbox.clone(),
            silence_timeout,
        }
    }

    /// Token stamped on this attempt's messages.
    #[must_use]
    pub fn token(&self) -> GenerationToken {
        self.token
    }

    /// Restart the silence period.
    pub fn touch(&self) {
        self.timer.reset();
    }

    /// Replace a timer that already fired with a fresh full silence period.
    pub fn rearm(&mut self) {
        self.timer = arm_timer(self.token, &self.inbox, self.silence_timeout);
        debug!(token = %self.token, "silence timer re-armed");
    }

    /// Close the channel and disarm the timer.
    pub fn teardown(self, reason: &str) {
        self.channel.close();
        self.timer.disarm();
        info!(token = %self.token, reason, "generation attempt torn down");
    }
}

/// Arm a watchdog that reports [`Signal::Timeout`] for `token`.
fn arm_timer(
    token: GenerationToken,
    inbox: &mpsc::Sender<Inbound>,
    silence_timeout: Duration,
) -> TimeoutHandle {
    let sink = ChannelSink::new(token, inbox.clone());
    TimeoutMonitor::new(silence_timeout).arm(async move {
        sink.deliver(Signal::Timeout {
            fired_at: Instant::now(),
        })
        .await;
    })
}

/// Holder for the single live attempt.
#[derive(Debug, Default)]
pub struct AttemptSlot {
    live: Option<ActiveAttempt>,
}

impl AttemptSlot {
    /// Whether an attempt is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Token of the live attempt.
    #[must_use]
    pub fn token(&self) -> Option<GenerationToken> {
        self.live.as_ref().map(ActiveAttempt::token)
    }

    /// Whether a message stamped with `token` belongs to the live attempt.
    #[must_use]
    pub fn accepts(&self, token: GenerationToken) -> bool {
        self.token() == Some(token)
    }

    /// Restart the live attempt's silence period.
    pub fn touch(&self) {
        if let Some(attempt) = &self.live {
            attempt.touch();
        }
    }

    /// Re-arm the live attempt's silence timer.
    pub fn rearm(&mut self) {
        if let Some(attempt) = &mut self.live {
            attempt.rearm();
        }
    }

    /// Tear down the live attempt, if any. Returns whether one was live.
    pub fn tear_down(&mut self, reason: &str) -> bool {
        match self.live.take() {
            Some(attempt) => {
                attempt.teardown(reason);
                true
            }
            None => false,
        }
    }

    /// Tear down any live attempt, then install `attempt`.
    pub fn install(&mut self, attempt: ActiveAttempt) {
        self.tear_down("superseded by a new attempt");
        self.live = Some(attempt);
    }
}
