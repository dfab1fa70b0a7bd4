//! Canonical patient entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived activity classification for a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    /// Has a recent or upcoming appointment.
    Active,
    /// Has appointment history but nothing recent or upcoming.
    Dormant,
    /// No appointments at all.
    Inactive,
}

impl ActivityStatus {
    /// Derive the status from appointment aggregates.
    #[must_use]
    pub fn derive(recent: i32, upcoming: i32, total: i32) -> Self {
        if recent > 0 || upcoming > 0 {
            Self::Active
        } else if total > 0 {
            Self::Dormant
        } else {
            Self::Inactive
        }
    }
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Dormant => write!(f, "dormant"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

impl std::str::FromStr for ActivityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "dormant" => Ok(Self::Dormant),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown activity status: {other}")),
        }
    }
}

/// The normalized, persisted representation of a remote patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPatient {
    pub organization_id: Uuid,
    /// Remote identifier, unique within the organization.
    pub external_id: String,
    pub name: String,
    /// E.164 number, or `None` when the raw value had no recognizable
    /// pattern.
    pub phone: Option<String>,
    pub email: Option<String>,
    pub recent_appointment_count: i32,
    pub upcoming_appointment_count: i32,
    pub total_appointment_count: i32,
    pub next_appointment_time: Option<DateTime<Utc>>,
    pub next_appointment_type: Option<String>,
    pub primary_appointment_type: Option<String>,
    pub last_appointment_date: Option<DateTime<Utc>>,
    pub treatment_notes: Option<String>,
    pub activity_status: ActivityStatus,
    /// Soft-deletion flag; deactivated rows are retained.
    pub is_active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl CanonicalPatient {
    /// Whether any tracked field differs from `other`.
    ///
    /// `is_active` and `last_synced_at` are bookkeeping, not tracked
    /// fields; excluding them keeps unchanged records as no-ops so repeat
    /// runs stay idempotent.
    #[must_use]
    pub fn differs_from(&self, other: &Self) -> bool {
        self.name != other.name
            || self.phone != other.phone
            || self.email != other.email
            || self.recent_appointment_count != other.recent_appointment_count
            || self.upcoming_appointment_count != other.upcoming_appointment_count
            || self.total_appointment_count != other.total_appointment_count
            || self.next_appointment_time != other.next_appointment_time
            || self.next_appointment_type != other.next_appointment_type
            || self.primary_appointment_type != other.primary_appointment_type
            || self.last_appointment_date != other.last_appointment_date
            || self.treatment_notes != other.treatment_notes
            || self.activity_status != other.activity_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn patient(org: Uuid, external_id: &str) -> CanonicalPatient {
        CanonicalPatient {
            organization_id: org,
            external_id: external_id.to_string(),
            name: "Jane Doe".to_string(),
            phone: Some("+61412345678".to_string()),
            email: None,
            recent_appointment_count: 1,
            upcoming_appointment_count: 0,
            total_appointment_count: 3,
            next_appointment_time: None,
            next_appointment_type: None,
            primary_appointment_type: Some("Initial Consult".to_string()),
            last_appointment_date: None,
            treatment_notes: None,
            activity_status: ActivityStatus::Active,
            is_active: true,
            last_synced_at: None,
        }
    }

    #[test]
    fn test_activity_status_derivation() {
        assert_eq!(ActivityStatus::derive(1, 0, 3), ActivityStatus::Active);
        assert_eq!(ActivityStatus::derive(0, 2, 2), ActivityStatus::Active);
        assert_eq!(ActivityStatus::derive(0, 0, 5), ActivityStatus::Dormant);
        assert_eq!(ActivityStatus::derive(0, 0, 0), ActivityStatus::Inactive);
    }

    #[test]
    fn test_activity_status_roundtrip() {
        for status in [
            ActivityStatus::Active,
            ActivityStatus::Dormant,
            ActivityStatus::Inactive,
        ] {
            let parsed: ActivityStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("archived".parse::<ActivityStatus>().is_err());
    }

    #[test]
    fn test_differs_ignores_bookkeeping() {
        let org = Uuid::new_v4();
        let a = patient(org, "x-1");
        let mut b = a.clone();
        b.is_active = false;
        b.last_synced_at = Some(Utc::now());
        assert!(!a.differs_from(&b));

        b.name = "Janet Doe".to_string();
        assert!(a.differs_from(&b));
    }
}
