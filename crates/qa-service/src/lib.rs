//! Podium Q&A session core.
//!
//! Runs live presentation sessions: presenters take the floor in rank order,
//! the audience raises hands, submits written questions, votes on questions
//! and reacts to document pages, and the service decides who asks next.
//!
//! # Architecture
//!
//! ```text
//! SessionOrchestrator (façade)
//! └── SessionControllerActor (singleton)
//!     └── MeetingActor (one per live meeting, single writer)
//!         └── services::{selector, tally, ledger, rotation, roster, documents}
//!             └── EntityStore (InMemoryStore | PgStore)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Per-meeting serialization
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with response codes
//! - [`models`] - Records and operation outcomes
//! - [`observability`] - Metrics and health endpoints
//! - [`orchestrator`] - Entry point for transports
//! - [`services`] - Session rules
//! - [`store`] - Entity store trait and implementations

pub mod actors;
pub mod config;
pub mod errors;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod services;
pub mod store;
