//! Actor bookkeeping: mailbox depth and live-meeting counts.
//!
//! | Actor Type | Normal  | Warning | Critical |
//! |------------|---------|---------|----------|
//! | Controller | <= 200  | 201-800 | > 800    |
//! | Meeting    | <= 100  | 101-400 | > 400    |
//!
//! Counters live in atomics so the controller, the meeting actors and the
//! health endpoint can read them without a lock. Every change is mirrored
//! into the Prometheus gauges in [`crate::observability::metrics`].

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Depths above which a mailbox counts as elevated or critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxLimits {
    pub elevated: usize,
    pub critical: usize,
}

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `SessionControllerActor` (singleton).
    Controller,
    /// `MeetingActor` (one per live meeting).
    Meeting,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ActorType::Controller => "controller",
            ActorType::Meeting => "meeting",
        }
    }

    #[must_use]
    pub const fn limits(self) -> MailboxLimits {
        match self {
            ActorType::Controller => MailboxLimits {
                elevated: 200,
                critical: 800,
            },
            ActorType::Meeting => MailboxLimits {
                elevated: 100,
                critical: 400,
            },
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

impl MailboxLevel {
    #[must_use]
    pub const fn classify(depth: usize, limits: MailboxLimits) -> Self {
        if depth > limits.critical {
            MailboxLevel::Critical
        } else if depth > limits.elevated {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Tracks one actor's queue depth and throughput.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Meeting id, or `"controller"`.
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// A message was taken off the channel and is about to be handled.
    pub fn record_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), depth);

        let limits = self.actor_type.limits();
        match MailboxLevel::classify(depth, limits) {
            MailboxLevel::Critical => warn!(
                target: "qa.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                critical = limits.critical,
                "Mailbox depth critical"
            ),
            // Log the crossing once, not every message above it.
            MailboxLevel::Warning if depth == limits.elevated + 1 => debug!(
                target: "qa.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                "Mailbox depth elevated"
            ),
            _ => {}
        }
    }

    /// The message has been handled.
    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)))
            .unwrap_or(0);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), previous.saturating_sub(1));
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        MailboxLevel::classify(self.current_depth(), self.actor_type.limits())
    }
}

/// Counters shared by every actor in the hierarchy.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    active_meetings: AtomicUsize,
    actor_panics: AtomicU64,
    total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn meeting_spawned(&self) {
        let count = self.active_meetings.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_meetings_active(count);
    }

    pub fn meeting_retired(&self) {
        let previous = self
            .active_meetings
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        prom::set_meetings_active(previous.saturating_sub(1));
    }

    /// Record an actor panic. Always a bug.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        prom::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "qa.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panic detected"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn meeting_count(&self) -> usize {
        self.active_meetings.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.total_messages_processed.load(Ordering::Relaxed)
    }
}
