//! # Q&A Test Utilities
//!
//! Shared test utilities for the Q&A service.
//!
//! ## Modules
//!
//! - `fixtures` - Seeded meetings and orchestrator wiring
//! - `faulty_store` - Store double with injectable commit failures and delays
//! - `assertions` - Store state verification helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use qa_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let store = Arc::new(FaultyStore::new());
//!     let meeting = TestMeeting::new()
//!         .with_audience(&["carol"])
//!         .seed(store.as_ref())
//!         .await;
//!     let orchestrator = test_orchestrator(store.clone());
//!
//!     // Run your test...
//! }
//! ```

pub mod assertions;
pub mod faulty_store;
pub mod fixtures;

pub use assertions::*;
pub use faulty_store::FaultyStore;
pub use fixtures::*;
