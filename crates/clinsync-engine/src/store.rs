//! Patient persistence: local snapshots and transactional plan application.

use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{ActivityStatus, CanonicalPatient};
use crate::reconcile::ReconcilePlan;

/// Errors from the patient persister.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The plan could not be applied, even after the conflict retry.
    #[error("failed to apply reconciliation plan: {message}")]
    ApplyFailed { message: String },

    /// Database error outside the apply retry path.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PersistError {
    /// Stable taxonomy code recorded in `error_details.error`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ApplyFailed { .. } => "PersistenceError.ApplyFailed",
            Self::Database(_) => "PersistenceError.Database",
        }
    }
}

/// Row counts from one applied plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyCounts {
    pub created: i32,
    pub updated: i32,
    pub deactivated: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct PatientRow {
    organization_id: Uuid,
    external_id: String,
    name: String,
    phone: Option<String>,
    email: Option<String>,
    recent_appointment_count: i32,
    upcoming_appointment_count: i32,
    total_appointment_count: i32,
    next_appointment_time: Option<chrono::DateTime<chrono::Utc>>,
    next_appointment_type: Option<String>,
    primary_appointment_type: Option<String>,
    last_appointment_date: Option<chrono::DateTime<chrono::Utc>>,
    treatment_notes: Option<String>,
    activity_status: String,
    is_active: bool,
    last_synced_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl PatientRow {
    fn into_patient(self) -> CanonicalPatient {
        CanonicalPatient {
            organization_id: self.organization_id,
            external_id: self.external_id,
            name: self.name,
            phone: self.phone,
            email: self.email,
            recent_appointment_count: self.recent_appointment_count,
            upcoming_appointment_count: self.upcoming_appointment_count,
            total_appointment_count: self.total_appointment_count,
            next_appointment_time: self.next_appointment_time,
            next_appointment_type: self.next_appointment_type,
            primary_appointment_type: self.primary_appointment_type,
            last_appointment_date: self.last_appointment_date,
            treatment_notes: self.treatment_notes,
            activity_status: self
                .activity_status
                .parse()
                .unwrap_or(ActivityStatus::Inactive),
            is_active: self.is_active,
            last_synced_at: self.last_synced_at,
        }
    }
}

/// Persister over the `patients` table.
#[derive(Debug, Clone)]
pub struct PatientStore {
    pool: PgPool,
}

impl PatientStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load every patient row for the organization, including soft-deleted
    /// ones. The reconciler needs the full set so reappearing records are
    /// reactivated rather than re-created.
    pub async fn snapshot(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<CanonicalPatient>, PersistError> {
        let rows = sqlx::query_as::<_, PatientRow>(
            r#"
            SELECT organization_id, external_id, name, phone, email,
                   recent_appointment_count, upcoming_appointment_count,
                   total_appointment_count, next_appointment_time,
                   next_appointment_type, primary_appointment_type,
                   last_appointment_date, treatment_notes, activity_status,
                   is_active, last_synced_at
            FROM patients
            WHERE organization_id = $1
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PatientRow::into_patient).collect())
    }

    /// Count of active patients for the organization.
    pub async fn active_count(&self, organization_id: Uuid) -> Result<i64, PersistError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM patients WHERE organization_id = $1 AND is_active",
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// Apply a reconciliation plan inside one transaction.
    ///
    /// Creates are attempted as plain inserts first; a unique-constraint
    /// violation (the snapshot raced with another writer, or a row was
    /// soft-deleted between snapshot and apply) triggers one retry of the
    /// whole transaction with upsert semantics. A failure on the retry
    /// surfaces as `ApplyFailed`.
    pub async fn apply(
        &self,
        organization_id: Uuid,
        plan: &ReconcilePlan,
    ) -> Result<ApplyCounts, PersistError> {
        match self.apply_once(organization_id, plan, false).await {
            Ok(counts) => Ok(counts),
            Err(e) if is_unique_violation(&e) => {
                tracing::warn!(
                    organization_id = %organization_id,
                    error = %e,
                    "Unique violation applying plan, retrying with upserts"
                );
                self.apply_once(organization_id, plan, true)
                    .await
                    .map_err(|e| PersistError::ApplyFailed {
                        message: e.to_string(),
                    })
            }
            Err(e) => Err(PersistError::ApplyFailed {
                message: e.to_string(),
            }),
        }
    }

    async fn apply_once(
        &self,
        organization_id: Uuid,
        plan: &ReconcilePlan,
        upsert: bool,
    ) -> Result<ApplyCounts, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut counts = ApplyCounts::default();

        for patient in &plan.to_create {
            let sql = if upsert {
                r#"
                INSERT INTO patients (
                    organization_id, external_id, name, phone, email,
                    recent_appointment_count, upcoming_appointment_count,
                    total_appointment_count, next_appointment_time,
                    next_appointment_type, primary_appointment_type,
                    last_appointment_date, treatment_notes, activity_status,
                    is_active, last_synced_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                        $13, $14, TRUE, NOW())
                ON CONFLICT (organization_id, external_id) DO UPDATE SET
                    name = EXCLUDED.name,
                    phone = EXCLUDED.phone,
                    email = EXCLUDED.email,
                    recent_appointment_count = EXCLUDED.recent_appointment_count,
                    upcoming_appointment_count = EXCLUDED.upcoming_appointment_count,
                    total_appointment_count = EXCLUDED.total_appointment_count,
                    next_appointment_time = EXCLUDED.next_appointment_time,
                    next_appointment_type = EXCLUDED.next_appointment_type,
                    primary_appointment_type = EXCLUDED.primary_appointment_type,
                    last_appointment_date = EXCLUDED.last_appointment_date,
                    treatment_notes = EXCLUDED.treatment_notes,
                    activity_status = EXCLUDED.activity_status,
                    is_active = TRUE,
                    last_synced_at = NOW(),
                    updated_at = NOW()
                "#
            } else {
                r#"
                INSERT INTO patients (
                    organization_id, external_id, name, phone, email,
                    recent_appointment_count, upcoming_appointment_count,
                    total_appointment_count, next_appointment_time,
                    next_appointment_type, primary_appointment_type,
                    last_appointment_date, treatment_notes, activity_status,
                    is_active, last_synced_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                        $13, $14, TRUE, NOW())
                "#
            };

            sqlx::query(sql)
                .bind(organization_id)
                .bind(&patient.external_id)
                .bind(&patient.name)
                .bind(&patient.phone)
                .bind(&patient.email)
                .bind(patient.recent_appointment_count)
                .bind(patient.upcoming_appointment_count)
                .bind(patient.total_appointment_count)
                .bind(patient.next_appointment_time)
                .bind(&patient.next_appointment_type)
                .bind(&patient.primary_appointment_type)
                .bind(patient.last_appointment_date)
                .bind(&patient.treatment_notes)
                .bind(patient.activity_status.to_string())
                .execute(&mut *tx)
                .await?;
            counts.created += 1;
        }

        for patient in &plan.to_update {
            let result = sqlx::query(
                r#"
                UPDATE patients SET
                    name = $3,
                    phone = $4,
                    email = $5,
                    recent_appointment_count = $6,
                    upcoming_appointment_count = $7,
                    total_appointment_count = $8,
                    next_appointment_time = $9,
                    next_appointment_type = $10,
                    primary_appointment_type = $11,
                    last_appointment_date = $12,
                    treatment_notes = $13,
                    activity_status = $14,
                    is_active = TRUE,
                    last_synced_at = NOW(),
                    updated_at = NOW()
                WHERE organization_id = $1 AND external_id = $2
                "#,
            )
            .bind(organization_id)
            .bind(&patient.external_id)
            .bind(&patient.name)
            .bind(&patient.phone)
            .bind(&patient.email)
            .bind(patient.recent_appointment_count)
            .bind(patient.upcoming_appointment_count)
            .bind(patient.total_appointment_count)
            .bind(patient.next_appointment_time)
            .bind(&patient.next_appointment_type)
            .bind(&patient.primary_appointment_type)
            .bind(patient.last_appointment_date)
            .bind(&patient.treatment_notes)
            .bind(patient.activity_status.to_string())
            .execute(&mut *tx)
            .await?;
            counts.updated += result.rows_affected() as i32;
        }

        if !plan.to_deactivate.is_empty() {
            let result = sqlx::query(
                r#"
                UPDATE patients SET
                    is_active = FALSE,
                    last_synced_at = NOW(),
                    updated_at = NOW()
                WHERE organization_id = $1
                  AND is_active
                  AND external_id = ANY($2)
                "#,
            )
            .bind(organization_id)
            .bind(&plan.to_deactivate)
            .execute(&mut *tx)
            .await?;
            counts.deactivated = result.rows_affected() as i32;
        }

        tx.commit().await?;
        Ok(counts)
    }
}

/// Whether the error is a Postgres unique-constraint violation (23505).
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_ignores_other_errors() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!is_unique_violation(&sqlx::Error::PoolClosed));
    }
}
