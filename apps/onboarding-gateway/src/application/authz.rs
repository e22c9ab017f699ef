use identity_core::{
    AccountRepository, CoreError,
    domain::{
        account::AccountProfile,
        role::{Capability, Role, can_invite, can_modify_account, ensure},
    },
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub enum Requirement {
    Capability(Capability),
    /// Actor must belong to the given tenant.
    TenantMember { tenant_id: Uuid },
    Invite { target_role: Role },
    ModifyAccount {
        target_role: Role,
        target_tenant_id: Option<Uuid>,
    },
}

/// Loads the profile behind a session. A session whose account is gone is
/// no longer authorized for anything.
pub async fn load_actor(
    accounts: &dyn AccountRepository,
    account_id: Uuid,
) -> Result<AccountProfile, CoreError> {
    accounts
        .find_by_id(account_id)
        .await?
        .ok_or_else(|| CoreError::Forbidden("session account no longer exists".into()))
}

/// Tenant of a tenant-scoped actor.
pub fn actor_tenant(actor: &AccountProfile) -> Result<Uuid, CoreError> {
    actor
        .tenant_id
        .ok_or_else(|| CoreError::Forbidden(format!("{} has no tenant", actor.role)))
}

pub fn authorize(actor: &AccountProfile, req: Requirement) -> Result<(), CoreError> {
    match req {
        Requirement::Capability(capability) => ensure(actor.role, capability),
        Requirement::TenantMember { tenant_id } => {
            if actor.tenant_id == Some(tenant_id) {
                Ok(())
            } else {
                Err(CoreError::Forbidden("actor belongs to another tenant".into()))
            }
        }
        Requirement::Invite { target_role } => {
            if can_invite(actor.role, target_role) {
                Ok(())
            } else {
                Err(CoreError::Forbidden(format!(
                    "{} may not invite {}",
                    actor.role, target_role
                )))
            }
        }
        Requirement::ModifyAccount {
            target_role,
            target_tenant_id,
        } => {
            if actor.tenant_id.is_none() || actor.tenant_id != target_tenant_id {
                return Err(CoreError::Forbidden("actor belongs to another tenant".into()));
            }
            if can_modify_account(actor.role, target_role) {
                Ok(())
            } else {
                Err(CoreError::Forbidden(format!(
                    "{} may not modify a {} account",
                    actor.role, target_role
                )))
            }
        }
    }
}
