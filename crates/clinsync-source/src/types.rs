//! Transient record types as returned by the remote practice API.
//!
//! These are not persisted directly; the sync engine normalizes them into
//! canonical entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A patient record as returned by the remote API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePatient {
    /// Remote identifier. The API emits it as either a string or a
    /// number depending on endpoint version.
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub treatment_notes: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemotePatient {
    /// Full display name built from the name parts.
    #[must_use]
    pub fn full_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or("").trim();
        let last = self.last_name.as_deref().unwrap_or("").trim();
        format!("{first} {last}").trim().to_string()
    }
}

/// An appointment record as returned by the remote API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAppointment {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub patient_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub appointment_type_id: Option<String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    /// Set when the appointment was cancelled; cancelled appointments are
    /// excluded from aggregation.
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// An appointment type as returned by the remote API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAppointmentType {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Accept ids serialized as strings or numbers; empty strings become
/// `None`.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patient_id_string_or_number() {
        let p: RemotePatient = serde_json::from_value(json!({"id": "abc-1"})).unwrap();
        assert_eq!(p.id.as_deref(), Some("abc-1"));

        let p: RemotePatient = serde_json::from_value(json!({"id": 42})).unwrap();
        assert_eq!(p.id.as_deref(), Some("42"));

        let p: RemotePatient = serde_json::from_value(json!({"id": ""})).unwrap();
        assert!(p.id.is_none());

        let p: RemotePatient = serde_json::from_value(json!({})).unwrap();
        assert!(p.id.is_none());
    }

    #[test]
    fn test_full_name() {
        let p: RemotePatient =
            serde_json::from_value(json!({"id": 1, "first_name": " Jane ", "last_name": "Doe"}))
                .unwrap();
        assert_eq!(p.full_name(), "Jane Doe");

        let p: RemotePatient = serde_json::from_value(json!({"id": 1, "last_name": "Doe"})).unwrap();
        assert_eq!(p.full_name(), "Doe");

        let p: RemotePatient = serde_json::from_value(json!({"id": 1})).unwrap();
        assert_eq!(p.full_name(), "");
    }

    #[test]
    fn test_appointment_parses_timestamps() {
        let a: RemoteAppointment = serde_json::from_value(json!({
            "id": 7,
            "patient_id": 42,
            "appointment_type_id": "t-1",
            "starts_at": "2026-03-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(a.patient_id.as_deref(), Some("42"));
        assert!(a.starts_at.is_some());
        assert!(a.cancelled_at.is_none());
    }
}
