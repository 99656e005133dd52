//! Appointment lifecycle management.
//!
//! [`LifecycleManager`] is the only component that moves an appointment between statuses. It
//! checks every transition locally against the row's current status before handing the write to
//! the store client, so an illegal move never reaches the store as a write.
//!
//! ## Concurrency
//!
//! The manager takes no locks. Each transition reads the current status immediately before
//! validating (never a cached read) and then issues a write that is conditional on that status.
//! If another caller moved the row in between, the store matches nothing and the caller gets
//! [`ClinicError::InvalidTransition`] carrying the status that actually won. Callers should not
//! pipeline transitions for the same id without awaiting each one.

use crate::appointment::{
    Appointment, AppointmentDraft, AppointmentId, AppointmentPatch, AppointmentStatus,
};
use crate::error::{ClinicError, ClinicResult};
use crate::store::{AppointmentStore, RowStore};

#[derive(Clone, Debug)]
pub struct LifecycleManager<S> {
    store: AppointmentStore<S>,
}

impl<S: RowStore> LifecycleManager<S> {
    pub fn new(store: AppointmentStore<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &AppointmentStore<S> {
        &self.store
    }

    pub async fn list(&self) -> ClinicResult<Vec<Appointment>> {
        self.store.list().await
    }

    pub async fn get(&self, id: &AppointmentId) -> ClinicResult<Appointment> {
        self.store.get(id).await
    }

    /// Books a new appointment. The initial status is always `pending`.
    pub async fn create(&self, draft: AppointmentDraft) -> ClinicResult<Appointment> {
        self.store.create(draft).await
    }

    /// Moves an appointment to `next`.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::InvalidTransition`] if `next` is not reachable from the current status,
    ///   either as read just now or because a concurrent write got there first
    /// - [`ClinicError::NotFound`] if no appointment has `id`
    /// - [`ClinicError::StoreUnavailable`] on transport failure
    pub async fn transition(
        &self,
        id: &AppointmentId,
        next: AppointmentStatus,
    ) -> ClinicResult<Appointment> {
        let current = self.store.get(id).await?;
        if let Err(err) = current.status.check_transition(next) {
            tracing::info!(id = %id, from = %current.status, to = %next, "rejected status transition");
            return Err(err);
        }

        let updated = self
            .store
            .update_if_status(id, current.status, AppointmentPatch::status(next))
            .await?;
        tracing::info!(id = %id, from = %current.status, to = %updated.status, "appointment status changed");
        Ok(updated)
    }

    pub async fn confirm(&self, id: &AppointmentId) -> ClinicResult<Appointment> {
        self.transition(id, AppointmentStatus::Confirmed).await
    }

    pub async fn complete(&self, id: &AppointmentId) -> ClinicResult<Appointment> {
        self.transition(id, AppointmentStatus::Completed).await
    }

    pub async fn cancel(&self, id: &AppointmentId) -> ClinicResult<Appointment> {
        self.transition(id, AppointmentStatus::Cancelled).await
    }

    /// Replaces the notes on an appointment in any status. Blank notes clear them.
    pub async fn update_notes(
        &self,
        id: &AppointmentId,
        notes: Option<String>,
    ) -> ClinicResult<Appointment> {
        self.store.update(id, AppointmentPatch::notes(notes)).await
    }
}

/// Convenience for callers that only need the legality check, e.g. to grey out buttons.
pub fn allowed_transitions(from: AppointmentStatus) -> Vec<AppointmentStatus> {
    AppointmentStatus::ALL
        .into_iter()
        .filter(|to| from.can_transition_to(*to))
        .collect()
}
