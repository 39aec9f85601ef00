//! Common utilities and types shared across Podium components.

#![warn(clippy::pedantic)]

/// Module for strongly-typed identifiers and small value types
pub mod types;

/// Module for common configuration fragments
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
