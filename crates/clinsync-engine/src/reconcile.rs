//! Pure diff of the normalized remote set against the local snapshot.

use std::collections::{HashMap, HashSet};

use crate::model::CanonicalPatient;
use crate::run::SyncMode;

/// The operations a reconciliation computed.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    /// Remote records with no active local counterpart.
    pub to_create: Vec<CanonicalPatient>,
    /// Remote records whose tracked fields differ from the local row.
    pub to_update: Vec<CanonicalPatient>,
    /// External ids of active local rows absent from the remote set.
    /// Populated only in full mode.
    pub to_deactivate: Vec<String>,
}

impl ReconcilePlan {
    /// Whether the plan contains no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_deactivate.is_empty()
    }

    /// Total number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_deactivate.len()
    }
}

/// Diff the normalized remote set against the active local snapshot.
///
/// Unchanged records are no-ops, so reconciling twice with no upstream
/// changes yields an empty second plan. Deactivation is computed only in
/// full mode: an incremental fetch observes just a narrow update window,
/// so absence from it says nothing about deletion upstream.
#[must_use]
pub fn reconcile(
    remote: Vec<CanonicalPatient>,
    local: &[CanonicalPatient],
    mode: SyncMode,
) -> ReconcilePlan {
    let local_by_id: HashMap<&str, &CanonicalPatient> = local
        .iter()
        .map(|p| (p.external_id.as_str(), p))
        .collect();

    let mut plan = ReconcilePlan::default();
    let mut remote_ids: HashSet<String> = HashSet::with_capacity(remote.len());

    for candidate in remote {
        // Duplicate external ids in one fetch collapse to the last
        // occurrence.
        if !remote_ids.insert(candidate.external_id.clone()) {
            if let Some(pos) = plan
                .to_create
                .iter()
                .position(|p| p.external_id == candidate.external_id)
            {
                plan.to_create.remove(pos);
            }
            if let Some(pos) = plan
                .to_update
                .iter()
                .position(|p| p.external_id == candidate.external_id)
            {
                plan.to_update.remove(pos);
            }
        }

        match local_by_id.get(candidate.external_id.as_str()) {
            None => plan.to_create.push(candidate),
            Some(existing) => {
                // A soft-deleted row that reappears remotely is updated
                // even when no tracked field changed, so apply reactivates
                // it.
                if !existing.is_active || candidate.differs_from(existing) {
                    plan.to_update.push(candidate);
                }
            }
        }
    }

    if mode == SyncMode::Full {
        plan.to_deactivate = local
            .iter()
            .filter(|p| p.is_active && !remote_ids.contains(&p.external_id))
            .map(|p| p.external_id.clone())
            .collect();
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActivityStatus;
    use uuid::Uuid;

    fn patient(org: Uuid, external_id: &str, name: &str) -> CanonicalPatient {
        CanonicalPatient {
            organization_id: org,
            external_id: external_id.to_string(),
            name: name.to_string(),
            phone: None,
            email: None,
            recent_appointment_count: 0,
            upcoming_appointment_count: 0,
            total_appointment_count: 0,
            next_appointment_time: None,
            next_appointment_type: None,
            primary_appointment_type: None,
            last_appointment_date: None,
            treatment_notes: None,
            activity_status: ActivityStatus::Inactive,
            is_active: true,
            last_synced_at: None,
        }
    }

    #[test]
    fn test_new_remote_records_create() {
        let org = Uuid::new_v4();
        let plan = reconcile(vec![patient(org, "x-1", "A")], &[], SyncMode::Full);
        assert_eq!(plan.to_create.len(), 1);
        assert!(plan.to_update.is_empty());
        assert!(plan.to_deactivate.is_empty());
    }

    #[test]
    fn test_changed_records_update() {
        let org = Uuid::new_v4();
        let local = vec![patient(org, "x-1", "Old Name")];
        let plan = reconcile(vec![patient(org, "x-1", "New Name")], &local, SyncMode::Full);
        assert!(plan.to_create.is_empty());
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].name, "New Name");
    }

    #[test]
    fn test_unchanged_records_are_noops() {
        let org = Uuid::new_v4();
        let local = vec![patient(org, "x-1", "Same")];
        let plan = reconcile(vec![patient(org, "x-1", "Same")], &local, SyncMode::Full);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_absent_records_deactivate_in_full_mode() {
        let org = Uuid::new_v4();
        let local = vec![patient(org, "x-1", "A"), patient(org, "x-2", "B")];
        let plan = reconcile(vec![patient(org, "x-1", "A")], &local, SyncMode::Full);
        assert_eq!(plan.to_deactivate, vec!["x-2".to_string()]);
    }

    #[test]
    fn test_incremental_never_deactivates() {
        let org = Uuid::new_v4();
        let local = vec![patient(org, "x-1", "A"), patient(org, "x-2", "B")];
        let plan = reconcile(vec![patient(org, "x-1", "A")], &local, SyncMode::Incremental);
        assert!(plan.to_deactivate.is_empty());
    }

    #[test]
    fn test_idempotence_second_run_is_empty() {
        let org = Uuid::new_v4();
        let remote = vec![
            patient(org, "x-1", "A"),
            patient(org, "x-2", "B"),
            patient(org, "x-3", "C"),
        ];

        // First run against an empty snapshot creates everything.
        let first = reconcile(remote.clone(), &[], SyncMode::Full);
        assert_eq!(first.to_create.len(), 3);

        // Second run against a snapshot equal to the remote set is empty.
        let second = reconcile(remote.clone(), &remote, SyncMode::Full);
        assert!(second.is_empty());
    }

    #[test]
    fn test_reappearing_deactivated_record_is_reactivated() {
        let org = Uuid::new_v4();
        let mut deactivated = patient(org, "x-1", "A");
        deactivated.is_active = false;
        let plan = reconcile(vec![patient(org, "x-1", "A")], &[deactivated], SyncMode::Full);
        assert!(plan.to_create.is_empty());
        assert_eq!(plan.to_update.len(), 1);
        assert!(plan.to_deactivate.is_empty());
    }

    #[test]
    fn test_duplicate_remote_ids_collapse_to_last() {
        let org = Uuid::new_v4();
        let remote = vec![patient(org, "x-1", "First"), patient(org, "x-1", "Second")];
        let plan = reconcile(remote, &[], SyncMode::Full);
        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].name, "Second");
    }
}
