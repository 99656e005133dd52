//! # API Shared
//!
//! Shared utilities and definitions for the clinic APIs.
//!
//! Contains:
//! - Shared response types and services like `HealthService`
//! - Session resolution against the identity provider (`auth` module)
//!
//! Used by `api-rest` and the CLI for common functionality.

pub mod auth;
pub mod health;

pub use auth::{SessionDirectory, SessionIdentity, SessionResolver, SESSION_HEADER};
pub use health::{HealthRes, HealthService};
