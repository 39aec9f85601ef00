//! Actor hierarchy that serializes work per meeting.
//!
//! ```text
//! SessionControllerActor (singleton)
//! └── supervises N MeetingActors
//!     └── MeetingActor (one per live meeting, single writer for it)
//! ```
//!
//! - **Lazy spawn**: a meeting gets an actor the first time it is touched
//! - **CancellationToken propagation**: meeting actors run on child tokens
//! - **Mailbox monitoring**: depth thresholds with metrics
//!   (Controller: 200/800, Meeting: 100/400)
//! - **Message passing**: `tokio::sync::mpsc` requests, `oneshot` replies
//!
//! # Modules
//!
//! - [`controller`] - `SessionControllerActor` supervisor
//! - [`meeting`] - `MeetingActor`, runs the session services for one meeting
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor counters

pub mod controller;
pub mod meeting;
pub mod messages;
pub mod metrics;

pub use controller::{ActorSettings, SessionControllerActor, SessionControllerActorHandle};
pub use meeting::{MeetingActor, MeetingActorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxLimits, MailboxMonitor};
