use crate::appointment::{AppointmentId, AppointmentStatus};

/// Transport-level failure reported by a row store backend.
///
/// The store client does not distinguish between these: every variant surfaces to callers as
/// [`ClinicError::StoreUnavailable`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("store responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode store response: {0}")]
    Decode(String),
    #[error("store is unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClinicError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("cannot move appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("appointment not found: {0}")]
    NotFound(AppointmentId),
    #[error("appointment store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("identity is not authorised for admin access")]
    Unauthorized,
    #[error("identity has not finished loading")]
    IdentityPending,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type ClinicResult<T> = std::result::Result<T, ClinicError>;
