//! Appointment store client.
//!
//! [`AppointmentStore`] is a typed façade over a remote row store holding the `appointments`
//! table. It keeps no cached state: every call is a round trip to the backend.
//!
//! Backends implement [`RowStore`]:
//! - [`RestRowStore`] talks PostgREST over HTTP (the production backend)
//! - [`InMemoryRowStore`] keeps rows in process, for development and tests
//!
//! Any backend failure is reported to callers as [`ClinicError::StoreUnavailable`]. Retrying is
//! left to the caller.

pub mod memory;
pub mod rest;

pub use memory::InMemoryRowStore;
pub use rest::RestRowStore;

use crate::appointment::{
    Appointment, AppointmentDraft, AppointmentId, AppointmentPatch, AppointmentStatus,
    NewAppointment,
};
use crate::error::{ClinicError, ClinicResult, StoreError};
use std::future::Future;
use std::sync::Arc;

/// Row-level operations on the appointments table.
pub trait RowStore: Send + Sync {
    /// Every row, ordered by `date` ascending.
    fn select_all(&self) -> impl Future<Output = Result<Vec<Appointment>, StoreError>> + Send;

    fn select_one(
        &self,
        id: &AppointmentId,
    ) -> impl Future<Output = Result<Option<Appointment>, StoreError>> + Send;

    /// Inserts a row and returns it as stored, with `id` and `created_at` filled in.
    fn insert(
        &self,
        row: &NewAppointment,
    ) -> impl Future<Output = Result<Appointment, StoreError>> + Send;

    /// Applies `patch` to the row with `id`.
    ///
    /// When `expected_status` is set the write only applies if the row's current status equals
    /// it. Returns `None` when no row matched.
    fn update(
        &self,
        id: &AppointmentId,
        expected_status: Option<AppointmentStatus>,
        patch: &AppointmentPatch,
    ) -> impl Future<Output = Result<Option<Appointment>, StoreError>> + Send;
}

impl<S: RowStore> RowStore for Arc<S> {
    fn select_all(&self) -> impl Future<Output = Result<Vec<Appointment>, StoreError>> + Send {
        (**self).select_all()
    }

    fn select_one(
        &self,
        id: &AppointmentId,
    ) -> impl Future<Output = Result<Option<Appointment>, StoreError>> + Send {
        (**self).select_one(id)
    }

    fn insert(
        &self,
        row: &NewAppointment,
    ) -> impl Future<Output = Result<Appointment, StoreError>> + Send {
        (**self).insert(row)
    }

    fn update(
        &self,
        id: &AppointmentId,
        expected_status: Option<AppointmentStatus>,
        patch: &AppointmentPatch,
    ) -> impl Future<Output = Result<Option<Appointment>, StoreError>> + Send {
        (**self).update(id, expected_status, patch)
    }
}

/// Typed CRUD client for appointment rows.
#[derive(Clone, Debug)]
pub struct AppointmentStore<S> {
    rows: S,
}

impl<S: RowStore> AppointmentStore<S> {
    pub fn new(rows: S) -> Self {
        Self { rows }
    }

    /// Lists every appointment, ordered by date ascending.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::StoreUnavailable`] if the store cannot be reached.
    pub async fn list(&self) -> ClinicResult<Vec<Appointment>> {
        Ok(self.rows.select_all().await?)
    }

    /// Fetches one appointment.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::NotFound`] if no row has `id`, or
    /// [`ClinicError::StoreUnavailable`] on transport failure.
    pub async fn get(&self, id: &AppointmentId) -> ClinicResult<Appointment> {
        self.rows
            .select_one(id)
            .await?
            .ok_or_else(|| ClinicError::NotFound(id.clone()))
    }

    /// Creates an appointment from a booking draft.
    ///
    /// The stored row is always `pending`; the store assigns `id` and `created_at`.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::Validation`] if a required field is missing or malformed (no
    /// store call is made), or [`ClinicError::StoreUnavailable`] on transport failure.
    pub async fn create(&self, draft: AppointmentDraft) -> ClinicResult<Appointment> {
        let row = draft.validate()?;
        let created = self.rows.insert(&row).await?;
        tracing::info!(id = %created.id, date = %created.date, "appointment created");
        Ok(created)
    }

    /// Applies a patch of mutable fields.
    ///
    /// A status change is checked against the row's current status, and the write is
    /// conditional on that status still holding when it reaches the store.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::Validation`] for an empty patch or a status the current row cannot move to
    /// - [`ClinicError::NotFound`] if no row has `id`
    /// - [`ClinicError::InvalidTransition`] if the row changed status between read and write
    /// - [`ClinicError::StoreUnavailable`] on transport failure
    pub async fn update(
        &self,
        id: &AppointmentId,
        patch: AppointmentPatch,
    ) -> ClinicResult<Appointment> {
        if patch.is_empty() {
            return Err(ClinicError::Validation(
                "update must change status or notes".into(),
            ));
        }

        match patch.status {
            Some(next) => {
                let current = self.get(id).await?;
                if !current.status.can_transition_to(next) {
                    return Err(ClinicError::Validation(format!(
                        "status {next} is not reachable from {}",
                        current.status
                    )));
                }
                self.update_if_status(id, current.status, patch).await
            }
            None => {
                let updated = self
                    .rows
                    .update(id, None, &patch)
                    .await?
                    .ok_or_else(|| ClinicError::NotFound(id.clone()))?;
                tracing::debug!(id = %id, "appointment notes updated");
                Ok(updated)
            }
        }
    }

    /// Applies `patch` only if the row's status is still `expected`.
    ///
    /// This is the serialisation point for concurrent transitions on one row: the store
    /// evaluates the status condition and the write atomically.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::InvalidTransition`] if the row exists but its status is no longer
    ///   `expected`
    /// - [`ClinicError::NotFound`] if no row has `id`
    /// - [`ClinicError::StoreUnavailable`] on transport failure
    pub async fn update_if_status(
        &self,
        id: &AppointmentId,
        expected: AppointmentStatus,
        patch: AppointmentPatch,
    ) -> ClinicResult<Appointment> {
        if let Some(updated) = self.rows.update(id, Some(expected), &patch).await? {
            return Ok(updated);
        }

        let actual = self.get(id).await?;
        tracing::warn!(
            id = %id,
            expected = %expected,
            actual = %actual.status,
            "conditional update lost to a concurrent status change"
        );
        Err(ClinicError::InvalidTransition {
            from: actual.status,
            to: patch.status.unwrap_or(expected),
        })
    }
}
