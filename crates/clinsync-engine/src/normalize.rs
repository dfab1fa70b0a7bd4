//! Normalization of remote records into canonical patients.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use clinsync_source::{RemoteAppointment, RemotePatient};

use crate::config::SyncConfig;
use crate::model::{ActivityStatus, CanonicalPatient};

/// Per-record normalization failure. Non-fatal: the record is skipped and
/// counted, the run continues.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The remote record has no usable external id.
    #[error("remote patient record has no external id (name: '{name}')")]
    MissingExternalId { name: String },
}

/// Normalize a raw phone value to E.164.
///
/// Rules, in order: strip non-digits; a number already prefixed with the
/// country code gets a `+`; a local number with the trunk prefix has it
/// replaced by the country code; anything else is unrecognizable and
/// becomes `None`. Never fails.
#[must_use]
pub fn normalize_phone(raw: &str, country_code: &str, trunk_prefix: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }

    if digits.len() > country_code.len() + 7 && digits.starts_with(country_code) {
        return Some(format!("+{digits}"));
    }

    if digits.len() > trunk_prefix.len() + 7 && digits.starts_with(trunk_prefix) {
        let national = &digits[trunk_prefix.len()..];
        return Some(format!("+{country_code}{national}"));
    }

    None
}

/// Maps remote patients plus their appointments to canonical entities.
#[derive(Debug)]
pub struct Normalizer {
    recent_window: Duration,
    upcoming_window: Duration,
    country_code: String,
    trunk_prefix: String,
    /// Appointment type id → display name, from the fetched types.
    types: HashMap<String, String>,
    now: DateTime<Utc>,
}

impl Normalizer {
    /// Create a normalizer for one run; `now` fixes the window boundaries
    /// for the whole run.
    #[must_use]
    pub fn new(config: &SyncConfig, types: HashMap<String, String>, now: DateTime<Utc>) -> Self {
        Self {
            recent_window: Duration::days(config.recent_window_days),
            upcoming_window: Duration::days(config.upcoming_window_days),
            country_code: config.country_code.clone(),
            trunk_prefix: config.trunk_prefix.clone(),
            types,
            now,
        }
    }

    /// Normalize one remote patient with its related appointments.
    pub fn normalize(
        &self,
        organization_id: Uuid,
        patient: &RemotePatient,
        appointments: &[&RemoteAppointment],
    ) -> Result<CanonicalPatient, NormalizeError> {
        let external_id = patient
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| NormalizeError::MissingExternalId {
                name: patient.full_name(),
            })?
            .to_string();

        // Cancelled and undated appointments do not count.
        let mut kept: Vec<&RemoteAppointment> = appointments
            .iter()
            .copied()
            .filter(|a| a.cancelled_at.is_none() && a.starts_at.is_some())
            .collect();
        kept.sort_by_key(|a| a.starts_at);

        let recent_cutoff = self.now - self.recent_window;
        let upcoming_cutoff = self.now + self.upcoming_window;

        let mut recent = 0;
        let mut upcoming = 0;
        let mut last_past: Option<&RemoteAppointment> = None;
        let mut next_future: Option<&RemoteAppointment> = None;

        for appt in &kept {
            let Some(starts_at) = appt.starts_at else {
                continue;
            };
            if starts_at <= self.now {
                if starts_at >= recent_cutoff {
                    recent += 1;
                }
                // Sorted ascending, so the last past appointment wins the
                // tie on equal starts_at.
                last_past = Some(appt);
            } else {
                if starts_at <= upcoming_cutoff {
                    upcoming += 1;
                }
                if next_future.is_none() {
                    next_future = Some(appt);
                }
            }
        }

        let total = kept.len() as i32;
        let phone = patient
            .phone_number
            .as_deref()
            .and_then(|raw| normalize_phone(raw, &self.country_code, &self.trunk_prefix));

        Ok(CanonicalPatient {
            organization_id,
            external_id,
            name: patient.full_name(),
            phone,
            email: non_empty(patient.email.as_deref()),
            recent_appointment_count: recent,
            upcoming_appointment_count: upcoming,
            total_appointment_count: total,
            next_appointment_time: next_future.and_then(|a| a.starts_at),
            next_appointment_type: next_future.and_then(|a| self.resolve_type(a)),
            primary_appointment_type: last_past.and_then(|a| self.resolve_type(a)),
            last_appointment_date: last_past.and_then(|a| a.starts_at),
            treatment_notes: non_empty(patient.treatment_notes.as_deref()),
            activity_status: ActivityStatus::derive(recent, upcoming, total),
            is_active: true,
            last_synced_at: None,
        })
    }

    /// Resolve an appointment's type id to its display name; unknown ids
    /// fall back to the raw id so aggregates stay populated.
    fn resolve_type(&self, appointment: &RemoteAppointment) -> Option<String> {
        let id = appointment.appointment_type_id.as_deref()?;
        Some(self.types.get(id).cloned().unwrap_or_else(|| id.to_string()))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer(types: &[(&str, &str)]) -> Normalizer {
        let index = types
            .iter()
            .map(|(id, name)| ((*id).to_string(), (*name).to_string()))
            .collect();
        Normalizer::new(&SyncConfig::default(), index, Utc::now())
    }

    fn remote_patient(id: &str) -> RemotePatient {
        serde_json::from_value(json!({
            "id": id,
            "first_name": "Jane",
            "last_name": "Doe",
            "phone_number": "0412345678"
        }))
        .unwrap()
    }

    fn appointment(patient_id: &str, type_id: &str, starts_at: DateTime<Utc>) -> RemoteAppointment {
        serde_json::from_value(json!({
            "id": "a-1",
            "patient_id": patient_id,
            "appointment_type_id": type_id,
            "starts_at": starts_at.to_rfc3339()
        }))
        .unwrap()
    }

    // Phone normalization vectors.
    #[test]
    fn test_phone_local_trunk() {
        assert_eq!(
            normalize_phone("0412345678", "61", "0"),
            Some("+61412345678".to_string())
        );
    }

    #[test]
    fn test_phone_already_e164() {
        assert_eq!(
            normalize_phone("+61412345678", "61", "0"),
            Some("+61412345678".to_string())
        );
    }

    #[test]
    fn test_phone_country_code_without_plus() {
        assert_eq!(
            normalize_phone("61412345678", "61", "0"),
            Some("+61412345678".to_string())
        );
    }

    #[test]
    fn test_phone_unrecognizable() {
        assert_eq!(normalize_phone("abc", "61", "0"), None);
        assert_eq!(normalize_phone("", "61", "0"), None);
        assert_eq!(normalize_phone("12345", "61", "0"), None);
    }

    #[test]
    fn test_phone_with_formatting() {
        assert_eq!(
            normalize_phone("(04) 1234 5678", "61", "0"),
            Some("+61412345678".to_string())
        );
    }

    #[test]
    fn test_missing_external_id_is_skippable_error() {
        let n = normalizer(&[]);
        let patient: RemotePatient =
            serde_json::from_value(json!({"first_name": "No", "last_name": "Id"})).unwrap();
        let result = n.normalize(Uuid::new_v4(), &patient, &[]);
        assert!(matches!(
            result,
            Err(NormalizeError::MissingExternalId { .. })
        ));
    }

    #[test]
    fn test_aggregation_counts_and_next() {
        let now = Utc::now();
        let n = normalizer(&[("t1", "Initial Consult"), ("t2", "Follow Up")]);

        let recent = appointment("p1", "t1", now - Duration::days(10));
        let old = appointment("p1", "t1", now - Duration::days(400));
        let soon = appointment("p1", "t2", now + Duration::days(3));
        let later = appointment("p1", "t2", now + Duration::days(20));

        let patient = remote_patient("p1");
        let canonical = n
            .normalize(Uuid::new_v4(), &patient, &[&later, &old, &soon, &recent])
            .unwrap();

        assert_eq!(canonical.recent_appointment_count, 1);
        assert_eq!(canonical.upcoming_appointment_count, 2);
        assert_eq!(canonical.total_appointment_count, 4);
        assert_eq!(canonical.next_appointment_time, soon.starts_at);
        assert_eq!(canonical.next_appointment_type.as_deref(), Some("Follow Up"));
        assert_eq!(
            canonical.primary_appointment_type.as_deref(),
            Some("Initial Consult")
        );
        assert_eq!(canonical.last_appointment_date, recent.starts_at);
        assert_eq!(canonical.activity_status, ActivityStatus::Active);
        assert_eq!(canonical.phone.as_deref(), Some("+61412345678"));
    }

    #[test]
    fn test_history_older_than_recent_window_stays_counted() {
        let now = Utc::now();
        let n = normalizer(&[("t1", "Initial Consult")]);

        let old = appointment("p1", "t1", now - Duration::days(120));
        let canonical = n
            .normalize(Uuid::new_v4(), &remote_patient("p1"), &[&old])
            .unwrap();

        assert_eq!(canonical.total_appointment_count, 1);
        assert_eq!(canonical.recent_appointment_count, 0);
        assert_eq!(canonical.upcoming_appointment_count, 0);
        assert_eq!(canonical.activity_status, ActivityStatus::Dormant);
        assert_eq!(canonical.last_appointment_date, old.starts_at);
        assert_eq!(
            canonical.primary_appointment_type.as_deref(),
            Some("Initial Consult")
        );
    }

    #[test]
    fn test_primary_type_tie_break_most_recent_wins() {
        let now = Utc::now();
        let n = normalizer(&[("t1", "Initial Consult"), ("t2", "Follow Up")]);

        let earlier = appointment("p1", "t1", now - Duration::days(30));
        let later = appointment("p1", "t2", now - Duration::days(5));

        let canonical = n
            .normalize(Uuid::new_v4(), &remote_patient("p1"), &[&later, &earlier])
            .unwrap();
        assert_eq!(canonical.primary_appointment_type.as_deref(), Some("Follow Up"));
    }

    #[test]
    fn test_cancelled_appointments_excluded() {
        let now = Utc::now();
        let n = normalizer(&[("t1", "Initial Consult")]);

        let mut cancelled = appointment("p1", "t1", now - Duration::days(1));
        cancelled.cancelled_at = Some(now - Duration::days(2));

        let canonical = n
            .normalize(Uuid::new_v4(), &remote_patient("p1"), &[&cancelled])
            .unwrap();
        assert_eq!(canonical.total_appointment_count, 0);
        assert_eq!(canonical.activity_status, ActivityStatus::Inactive);
        assert!(canonical.primary_appointment_type.is_none());
    }

    #[test]
    fn test_unknown_type_falls_back_to_raw_id() {
        let now = Utc::now();
        let n = normalizer(&[]);
        let appt = appointment("p1", "t-unknown", now - Duration::days(1));

        let canonical = n
            .normalize(Uuid::new_v4(), &remote_patient("p1"), &[&appt])
            .unwrap();
        assert_eq!(
            canonical.primary_appointment_type.as_deref(),
            Some("t-unknown")
        );
    }

    #[test]
    fn test_dormant_when_only_old_history() {
        let now = Utc::now();
        let n = normalizer(&[("t1", "Initial Consult")]);
        let old = appointment("p1", "t1", now - Duration::days(400));

        let canonical = n
            .normalize(Uuid::new_v4(), &remote_patient("p1"), &[&old])
            .unwrap();
        assert_eq!(canonical.recent_appointment_count, 0);
        assert_eq!(canonical.activity_status, ActivityStatus::Dormant);
        assert_eq!(canonical.last_appointment_date, old.starts_at);
    }
}
