//! Observability for the Q&A service.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Question bodies and user credentials are never logged or used as labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `qa_store_operation_duration_seconds` | Histogram | `operation`, `status` | Store call latency |
//! | `qa_store_operations_total` | Counter | `operation`, `status` | Store call volume and errors |
//! | `qa_operation_duration_seconds` | Histogram | `operation`, `status` | Orchestrator latency |
//! | `qa_questions_selected_total` | Counter | `source` | Which selector branch fired |
//! | `qa_meetings_active` | Gauge | none | Live meeting actors |
//! | `qa_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `qa_actor_panics_total` | Counter | `actor_type` | Actor panics (bugs) |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::{
    init_metrics_recorder, record_actor_panic, record_operation, record_question_selected,
    record_store_operation, set_actor_mailbox_depth, set_meetings_active,
};
