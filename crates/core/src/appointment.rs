//! Appointment records and their status machine.
//!
//! An [`Appointment`] is one scheduled patient visit. Patient fields and the slot are fixed at
//! creation; only `status` and `notes` change afterwards, and `status` only moves forward:
//!
//! ```text
//! pending ──► confirmed ──► completed
//!    │            │
//!    └──────► cancelled ◄┘
//! ```

use crate::constants::{DATE_FORMAT, TIME_FORMAT};
use crate::error::{ClinicError, ClinicResult};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clinic_types::{EmailAddress, NonEmptyText, TextError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Store-assigned identifier of an appointment row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(String);

impl AppointmentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of an appointment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    /// Booked but not yet confirmed by the clinic. Initial state.
    Pending,
    /// Accepted by the clinic.
    Confirmed,
    /// The visit took place.
    Completed,
    /// Called off by either side.
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 4] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    /// Returns whether `self -> next` is one of the four permitted transitions.
    ///
    /// Self-transitions are not permitted.
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Cancelled)
        )
    }

    /// Like [`can_transition_to`](Self::can_transition_to), as a `Result`.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::InvalidTransition`] when the move is not permitted.
    pub fn check_transition(self, next: AppointmentStatus) -> ClinicResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(ClinicError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Terminal statuses have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = ClinicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(AppointmentStatus::Pending),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(ClinicError::Validation(format!(
                "unknown appointment status '{other}'"
            ))),
        }
    }
}

/// A persisted appointment row.
///
/// `patient_email` is only required to be non-empty here: rows written by other clients are
/// listed as they are, and the address check applies to new bookings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub patient_name: NonEmptyText,
    pub patient_email: NonEmptyText,
    pub patient_phone: NonEmptyText,
    pub date: NaiveDate,
    /// Slot start as `HH:MM`.
    pub time: String,
    pub treatment: NonEmptyText,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Unvalidated creation input, typically straight from a booking form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentDraft {
    pub patient_name: String,
    pub patient_email: String,
    pub patient_phone: String,
    pub date: String,
    pub time: String,
    pub treatment: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AppointmentDraft {
    /// Validates every required field and produces the row to insert.
    ///
    /// The resulting row always starts out [`AppointmentStatus::Pending`].
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::Validation`] naming the first field that is missing, blank, or
    /// malformed.
    pub fn validate(self) -> ClinicResult<NewAppointment> {
        let patient_name = required("patient_name", &self.patient_name)?;
        let patient_email = EmailAddress::parse(&self.patient_email)
            .map_err(|e| field_error("patient_email", e))?;
        let patient_phone = required("patient_phone", &self.patient_phone)?;
        let date = NaiveDate::parse_from_str(required("date", &self.date)?.as_str(), DATE_FORMAT)
            .map_err(|_| {
                ClinicError::Validation(format!("date must be YYYY-MM-DD, got '{}'", self.date))
            })?;
        let time = required("time", &self.time)?;
        NaiveTime::parse_from_str(time.as_str(), TIME_FORMAT).map_err(|_| {
            ClinicError::Validation(format!("time must be HH:MM, got '{}'", self.time))
        })?;
        let treatment = required("treatment", &self.treatment)?;

        Ok(NewAppointment {
            patient_name,
            patient_email,
            patient_phone,
            date,
            time: time.into_inner(),
            treatment,
            status: AppointmentStatus::Pending,
            notes: normalise_notes(self.notes),
        })
    }
}

fn required(field: &str, value: &str) -> ClinicResult<NonEmptyText> {
    NonEmptyText::new(value).map_err(|e| field_error(field, e))
}

fn field_error(field: &str, err: TextError) -> ClinicError {
    match err {
        TextError::Empty => ClinicError::Validation(format!("{field} is required")),
        other => ClinicError::Validation(format!("{field}: {other}")),
    }
}

fn normalise_notes(notes: Option<String>) -> Option<String> {
    notes
        .map(|n| n.trim().to_owned())
        .filter(|n| !n.is_empty())
}

/// A validated row ready for insertion. The store assigns `id` and `created_at`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewAppointment {
    pub patient_name: NonEmptyText,
    pub patient_email: EmailAddress,
    pub patient_phone: NonEmptyText,
    pub date: NaiveDate,
    pub time: String,
    pub treatment: NonEmptyText,
    status: AppointmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewAppointment {
    pub fn status(&self) -> AppointmentStatus {
        self.status
    }
}

/// The mutable subset of an appointment.
///
/// `notes` is doubly optional: `None` leaves notes untouched, `Some(None)` clears them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AppointmentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

impl AppointmentPatch {
    pub fn status(status: AppointmentStatus) -> Self {
        Self {
            status: Some(status),
            notes: None,
        }
    }

    /// Sets notes; blank input clears them.
    pub fn notes(notes: Option<String>) -> Self {
        Self {
            status: None,
            notes: Some(normalise_notes(notes)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.notes.is_none()
    }

    pub fn apply_to(&self, appointment: &mut Appointment) {
        if let Some(status) = self.status {
            appointment.status = status;
        }
        if let Some(notes) = &self.notes {
            appointment.notes = notes.clone();
        }
    }
}

#[cfg(test)]
pub(crate) fn jane_doe() -> AppointmentDraft {
    AppointmentDraft {
        patient_name: "Jane Doe".into(),
        patient_email: "jane@x.com".into(),
        patient_phone: "555-0100".into(),
        date: "2024-05-01".into(),
        time: "10:00".into(),
        treatment: "Laser Toning".into(),
        notes: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AppointmentStatus::*;

    #[test]
    fn exactly_four_transitions_are_legal() {
        let legal = [
            (Pending, Confirmed),
            (Pending, Cancelled),
            (Confirmed, Completed),
            (Confirmed, Cancelled),
        ];
        let mut illegal = 0;
        for from in AppointmentStatus::ALL {
            for to in AppointmentStatus::ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
                if !expected {
                    illegal += 1;
                    assert!(matches!(
                        from.check_transition(to),
                        Err(ClinicError::InvalidTransition { from: f, to: t }) if f == from && t == to
                    ));
                }
            }
        }
        assert_eq!(illegal, 12);
    }

    #[test]
    fn nothing_returns_to_pending() {
        for from in AppointmentStatus::ALL {
            assert!(!from.can_transition_to(Pending));
        }
    }

    #[test]
    fn terminal_statuses_have_no_outgoing_transitions() {
        for from in AppointmentStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            assert!(AppointmentStatus::ALL
                .iter()
                .all(|to| !from.can_transition_to(*to)));
        }
    }

    #[test]
    fn status_parses_lowercase_names() {
        assert_eq!("confirmed".parse::<AppointmentStatus>().unwrap(), Confirmed);
        assert!(matches!(
            "Confirmed".parse::<AppointmentStatus>(),
            Err(ClinicError::Validation(_))
        ));
    }

    #[test]
    fn validated_draft_starts_pending() {
        let row = jane_doe().validate().expect("draft is valid");
        assert_eq!(row.status(), Pending);
        assert_eq!(row.patient_name.as_str(), "Jane Doe");
        assert_eq!(row.date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    }

    #[test]
    fn draft_rejects_blank_required_field() {
        let mut draft = jane_doe();
        draft.patient_phone = "   ".into();
        match draft.validate() {
            Err(ClinicError::Validation(msg)) => assert!(msg.contains("patient_phone")),
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn draft_rejects_malformed_slot() {
        let mut draft = jane_doe();
        draft.date = "01/05/2024".into();
        assert!(matches!(draft.validate(), Err(ClinicError::Validation(msg)) if msg.contains("date")));

        let mut draft = jane_doe();
        draft.time = "10am".into();
        assert!(matches!(draft.validate(), Err(ClinicError::Validation(msg)) if msg.contains("time")));
    }

    #[test]
    fn draft_rejects_bad_email() {
        let mut draft = jane_doe();
        draft.patient_email = "jane.x.com".into();
        assert!(
            matches!(draft.validate(), Err(ClinicError::Validation(msg)) if msg.contains("patient_email"))
        );
    }

    #[test]
    fn draft_accepts_local_domain_email() {
        let mut draft = jane_doe();
        draft.patient_email = "bob@localhost".into();
        let row = draft.validate().expect("draft is valid");
        assert_eq!(row.patient_email.as_str(), "bob@localhost");
    }

    #[test]
    fn insert_row_serialises_pending_status() {
        let row = jane_doe().validate().unwrap();
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["date"], "2024-05-01");
        assert!(json.get("notes").is_none());
    }

    #[test]
    fn decodes_store_row() {
        let raw = r#"{
            "id": "9b2f7c1e-0c0f-4d55-a7e1-3f1c2f9d8e10",
            "patient_name": "Jane Doe",
            "patient_email": "jane@x.com",
            "patient_phone": "555-0100",
            "date": "2024-05-01",
            "time": "10:00",
            "treatment": "Laser Toning",
            "status": "confirmed",
            "notes": null,
            "created_at": "2024-04-20T09:15:00.123456+00:00"
        }"#;
        let appointment: Appointment = serde_json::from_str(raw).expect("row decodes");
        assert_eq!(appointment.status, Confirmed);
        assert_eq!(appointment.notes, None);
    }

    #[test]
    fn decodes_rows_with_loosely_formed_email() {
        let raw = r#"[
            {"id": "a1", "patient_name": "Jane Doe", "patient_email": "jane@x.com",
             "patient_phone": "555-0100", "date": "2024-05-01", "time": "10:00",
             "treatment": "Laser Toning", "status": "pending", "notes": null,
             "created_at": "2024-04-20T09:15:00Z"},
            {"id": "a2", "patient_name": "Bob", "patient_email": "bob at clinic",
             "patient_phone": "555-0101", "date": "2024-05-02", "time": "11:00",
             "treatment": "Peel", "status": "pending",
             "created_at": "2024-04-21T09:15:00Z"}
        ]"#;
        let rows: Vec<Appointment> = serde_json::from_str(raw).expect("rows decode");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].patient_email.as_str(), "bob at clinic");
    }

    #[test]
    fn notes_patch_clears_blank_notes() {
        let patch = AppointmentPatch::notes(Some("  ".into()));
        assert_eq!(patch.notes, Some(None));
        assert_eq!(serde_json::to_value(&patch).unwrap()["notes"], serde_json::Value::Null);
        assert!(AppointmentPatch::default().is_empty());
    }
}
