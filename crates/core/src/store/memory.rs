//! In-process row store.
//!
//! Behaves like the remote table: assigns ids and creation timestamps, orders by date, and
//! evaluates conditional updates atomically under one lock. It can also be switched
//! "unavailable" to exercise outage handling.

use super::RowStore;
use crate::appointment::{
    Appointment, AppointmentId, AppointmentPatch, AppointmentStatus, NewAppointment,
};
use crate::error::StoreError;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryRowStore {
    rows: Mutex<Vec<Appointment>>,
    unavailable: AtomicBool,
    update_calls: AtomicUsize,
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable, every operation fails with [`StoreError::Unreachable`].
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of `update` calls received so far, matched or not.
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn rows(&self) -> Result<MutexGuard<'_, Vec<Appointment>>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable(
                "in-memory store switched off".into(),
            ));
        }
        Ok(self.rows.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl RowStore for InMemoryRowStore {
    async fn select_all(&self) -> Result<Vec<Appointment>, StoreError> {
        let mut rows = self.rows()?.clone();
        rows.sort_by_key(|row| row.date);
        Ok(rows)
    }

    async fn select_one(&self, id: &AppointmentId) -> Result<Option<Appointment>, StoreError> {
        Ok(self.rows()?.iter().find(|row| &row.id == id).cloned())
    }

    async fn insert(&self, row: &NewAppointment) -> Result<Appointment, StoreError> {
        let created = Appointment {
            id: AppointmentId::new(Uuid::new_v4().to_string()),
            patient_name: row.patient_name.clone(),
            patient_email: row.patient_email.clone().into(),
            patient_phone: row.patient_phone.clone(),
            date: row.date,
            time: row.time.clone(),
            treatment: row.treatment.clone(),
            status: row.status(),
            notes: row.notes.clone(),
            created_at: Utc::now(),
        };
        self.rows()?.push(created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        id: &AppointmentId,
        expected_status: Option<AppointmentStatus>,
        patch: &AppointmentPatch,
    ) -> Result<Option<Appointment>, StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows()?;
        let Some(row) = rows.iter_mut().find(|row| &row.id == id) else {
            return Ok(None);
        };
        if expected_status.is_some_and(|expected| row.status != expected) {
            return Ok(None);
        }
        patch.apply_to(row);
        Ok(Some(row.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appointment::jane_doe;

    #[tokio::test]
    async fn insert_assigns_distinct_ids() {
        let store = InMemoryRowStore::new();
        let row = jane_doe().validate().unwrap();
        let a = store.insert(&row).await.unwrap();
        let b = store.insert(&row).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, AppointmentStatus::Pending);
    }

    #[tokio::test]
    async fn conditional_update_misses_on_other_status() {
        let store = InMemoryRowStore::new();
        let created = store.insert(&jane_doe().validate().unwrap()).await.unwrap();

        let missed = store
            .update(
                &created.id,
                Some(AppointmentStatus::Confirmed),
                &AppointmentPatch::status(AppointmentStatus::Completed),
            )
            .await
            .unwrap();
        assert!(missed.is_none());

        let hit = store
            .update(
                &created.id,
                Some(AppointmentStatus::Pending),
                &AppointmentPatch::status(AppointmentStatus::Confirmed),
            )
            .await
            .unwrap()
            .expect("row matched");
        assert_eq!(hit.status, AppointmentStatus::Confirmed);
        assert_eq!(store.update_calls(), 2);
    }

    #[tokio::test]
    async fn switching_off_fails_every_call() {
        let store = InMemoryRowStore::new();
        store.set_available(false);
        assert!(matches!(
            store.select_all().await,
            Err(StoreError::Unreachable(_))
        ));
        store.set_available(true);
        assert!(store.select_all().await.unwrap().is_empty());
    }
}
