//! Roles and the static authorization matrix.
//!
//! The matrix is a pure function; every state-mutating command consults it
//! on its own, independently of whatever affordances a client renders from
//! `Role::capabilities`.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    TenantOperator,
    Administrator,
    Librarian,
    Teacher,
    Learner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    ManageTenants,
    ManageCatalog,
    ManageAccounts,
    ManageLoans,
    ManageInvitations,
    ManageTenantSettings,
    ManageOwnStudents,
    ManageSuggestions,
    BrowseCatalog,
    RequestItems,
    ReviewItems,
}

impl Capability {
    pub const ALL: [Capability; 11] = [
        Capability::ManageTenants,
        Capability::ManageCatalog,
        Capability::ManageAccounts,
        Capability::ManageLoans,
        Capability::ManageInvitations,
        Capability::ManageTenantSettings,
        Capability::ManageOwnStudents,
        Capability::ManageSuggestions,
        Capability::BrowseCatalog,
        Capability::RequestItems,
        Capability::ReviewItems,
    ];
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::TenantOperator,
        Role::Administrator,
        Role::Librarian,
        Role::Teacher,
        Role::Learner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::TenantOperator => "tenantOperator",
            Role::Administrator => "administrator",
            Role::Librarian => "librarian",
            Role::Teacher => "teacher",
            Role::Learner => "learner",
        }
    }

    /// The role that enrolls itself with an enrollment id instead of an
    /// email and password.
    pub fn is_self_enrolling(&self) -> bool {
        matches!(self, Role::Learner)
    }

    /// Operators administer the platform and belong to no tenant.
    pub fn is_tenant_scoped(&self) -> bool {
        !matches!(self, Role::TenantOperator)
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|cap| authorize(*self, *cap))
            .collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tenantOperator" => Ok(Role::TenantOperator),
            "administrator" => Ok(Role::Administrator),
            "librarian" => Ok(Role::Librarian),
            "teacher" => Ok(Role::Teacher),
            "learner" => Ok(Role::Learner),
            other => Err(CoreError::Validation(format!("Unknown role: {}", other))),
        }
    }
}

pub fn authorize(role: Role, capability: Capability) -> bool {
    use Capability::*;
    match role {
        Role::TenantOperator => matches!(capability, ManageTenants),
        Role::Administrator => !matches!(capability, ManageTenants),
        Role::Librarian => matches!(
            capability,
            ManageCatalog | ManageAccounts | ManageLoans | BrowseCatalog | RequestItems | ReviewItems
        ),
        Role::Teacher => matches!(
            capability,
            ManageOwnStudents | ManageSuggestions | BrowseCatalog | RequestItems | ReviewItems
        ),
        Role::Learner => matches!(capability, BrowseCatalog | RequestItems | ReviewItems),
    }
}

/// Whether `issuer` may issue a regular invitation for `target`.
///
/// Administrator invitations only come from tenant provisioning, so no
/// role may invite an administrator (or an operator) here.
pub fn can_invite(issuer: Role, target: Role) -> bool {
    authorize(issuer, Capability::ManageInvitations)
        && matches!(target, Role::Librarian | Role::Teacher | Role::Learner)
}

/// Whether `actor` may edit or delete an account holding `target`.
pub fn can_modify_account(actor: Role, target: Role) -> bool {
    if !authorize(actor, Capability::ManageAccounts) {
        return false;
    }
    match (actor, target) {
        (_, Role::TenantOperator) => false,
        (Role::Librarian, Role::Administrator) => false,
        _ => true,
    }
}

/// Turns a matrix denial into `CoreError::Forbidden`.
pub fn ensure(role: Role, capability: Capability) -> Result<(), CoreError> {
    if authorize(role, capability) {
        Ok(())
    } else {
        Err(CoreError::Forbidden(format!(
            "{} may not {:?}",
            role.as_str(),
            capability
        )))
    }
}
