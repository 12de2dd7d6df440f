//! Deterministic naming for every pod entity.
//!
//! All names are pure functions of the student index and the configured UPN
//! domain, so two runs with the same inputs always address the same objects.
//! Idempotency across the whole pipeline rests on this module.

use crate::types::{AccountRole, GroupRole, StudentIndex};

/// Upper bound on the number of students a lab supports.
pub const MAX_STUDENTS: u32 = 100;

/// Display name of the one shared custom Intune role.
pub const LAB_INTUNE_ROLE_NAME: &str = "Lab Intune Admin";

/// Default directory role delegated per administrative unit.
pub const DEFAULT_DIRECTORY_ROLE: &str = "User Administrator";

/// Resource actions granted by the shared Intune role. Fixed allow-list,
/// never a wildcard. `DeviceCompliancePolices` is the service's own spelling.
pub const LAB_INTUNE_ALLOWED_ACTIONS: &[&str] = &[
    "Microsoft.Intune_MobileApps_Create",
    "Microsoft.Intune_MobileApps_Read",
    "Microsoft.Intune_MobileApps_Update",
    "Microsoft.Intune_MobileApps_Delete",
    "Microsoft.Intune_MobileApps_Assign",
    "Microsoft.Intune_DeviceConfigurations_Create",
    "Microsoft.Intune_DeviceConfigurations_Read",
    "Microsoft.Intune_DeviceConfigurations_Update",
    "Microsoft.Intune_DeviceConfigurations_Delete",
    "Microsoft.Intune_DeviceConfigurations_Assign",
    "Microsoft.Intune_DeviceCompliancePolices_Read",
    "Microsoft.Intune_DeviceCompliancePolices_Assign",
    "Microsoft.Intune_ManagedDevices_Read",
    "Microsoft.Intune_ManagedDevices_Retire",
    "Microsoft.Intune_ManagedDevices_Wipe",
    "Microsoft.Intune_RemoteTasks_RebootNow",
    "Microsoft.Intune_RemoteTasks_SyncDevice",
];

/// Computes the deterministic names for one student's pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodNames {
    index: StudentIndex,
    domain: String,
}

impl PodNames {
    pub fn new(index: StudentIndex, domain: impl Into<String>) -> Self {
        PodNames {
            index,
            domain: domain.into(),
        }
    }

    pub fn index(&self) -> StudentIndex {
        self.index
    }

    /// UPN for one of the two per-student accounts.
    pub fn upn(&self, role: AccountRole) -> String {
        match role {
            AccountRole::Admin => format!("admin{}@{}", self.index, self.domain),
            AccountRole::Student => format!("W365Student{}@{}", self.index, self.domain),
        }
    }

    pub fn admin_upn(&self) -> String {
        self.upn(AccountRole::Admin)
    }

    pub fn student_upn(&self) -> String {
        self.upn(AccountRole::Student)
    }

    pub fn account_display_name(&self, role: AccountRole) -> String {
        match role {
            AccountRole::Admin => format!("Student {} Admin", self.index),
            AccountRole::Student => format!("W365 Student {}", self.index),
        }
    }

    /// Mail nickname for an account (the UPN's local part).
    pub fn account_nickname(&self, role: AccountRole) -> String {
        match role {
            AccountRole::Admin => format!("admin{}", self.index),
            AccountRole::Student => format!("W365Student{}", self.index),
        }
    }

    pub fn group_name(&self, role: GroupRole) -> String {
        format!("SG-Student{}-{}", self.index, role.suffix())
    }

    /// Mail nickname for a group, kept to letters and digits.
    pub fn group_nickname(&self, role: GroupRole) -> String {
        format!("SGStudent{}{}", self.index, role.suffix())
    }

    pub fn scope_tag_name(&self) -> String {
        format!("ST{}", self.index)
    }

    pub fn admin_unit_name(&self) -> String {
        format!("AU-Student{}", self.index)
    }

    /// Display name for the student's delegated role assignment. The service
    /// does not key assignments by name, so this is cosmetic; the idempotency
    /// check is by principal.
    pub fn role_assignment_name(&self) -> String {
        format!("RA-Student{}", self.index)
    }
}
