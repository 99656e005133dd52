//! # Clinic Core
//!
//! Core business logic for the clinic appointment system.
//!
//! This crate contains:
//! - Appointment records, their status machine and the store client ([`store`])
//! - The lifecycle manager that enforces legal status transitions ([`lifecycle`])
//! - The admin access gate ([`access`])
//! - The single-session conversation controller ([`conversation`])
//!
//! **No API concerns**: HTTP servers, session resolution and request handling belong in
//! `api-rest` or `api-shared`.

pub mod access;
pub mod appointment;
pub mod config;
pub mod constants;
pub mod conversation;
pub mod error;
pub mod lifecycle;
pub mod store;

pub use access::{AccessGate, Decision, Identity, IdentityProvider, ProviderError};
pub use appointment::{
    Appointment, AppointmentDraft, AppointmentId, AppointmentPatch, AppointmentStatus,
    NewAppointment,
};
pub use config::{connect_timeout_from_env_value, CoreConfig, StoreConfig};
pub use conversation::{
    ConversationController, ConversationError, ConversationTransport, DisconnectReason,
    SessionCallbacks, SessionStatus, TransportConnection, TransportEvents, TriggerHandle,
    WebSocketTransport,
};
pub use error::{ClinicError, ClinicResult, StoreError};
pub use lifecycle::{allowed_transitions, LifecycleManager};
pub use store::{AppointmentStore, InMemoryRowStore, RestRowStore, RowStore};
