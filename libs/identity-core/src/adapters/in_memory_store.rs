use crate::{
    AccountRepository, CoreError, CredentialStore, InvitationRepository, TenantRepository,
    domain::{
        account::{
            AccountProfile, AccountUpdate, NewAccount, RedeemedAccount, Redemption, can_activate,
            normalize_email,
        },
        credential::CredentialHasher,
        invitation::{InvitationKind, InvitationToken, TokenError},
        role::Role,
        tenant::Tenant,
    },
};
use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct CredentialRecord {
    identity_id: Uuid,
    password_hash: String,
}

#[derive(Debug, Clone)]
struct IdentityRecord {
    account_id: Uuid,
    login_email: String,
}

/// In-memory implementation of every store port, for tests and
/// single-executable mode.
///
/// Single-record writes go through DashMap entries. Writes that span several
/// maps (enrollment, redemption, bootstrap replacement) also hold `writes`,
/// which is always taken before any map lock.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    tenants: Arc<DashMap<Uuid, Tenant>>,
    subdomains: Arc<DashMap<String, Uuid>>,
    tokens: Arc<DashMap<Uuid, InvitationToken>>,
    // secret hash -> token id
    secrets: Arc<DashMap<String, Uuid>>,
    accounts: Arc<DashMap<Uuid, AccountProfile>>,
    // profile email -> account id
    emails: Arc<DashMap<String, Uuid>>,
    // (tenant id, enrollment id) -> account id
    enrollments: Arc<DashMap<(Uuid, String), Uuid>>,
    identities: Arc<DashMap<Uuid, IdentityRecord>>,
    // login email -> credential
    credentials: Arc<DashMap<String, CredentialRecord>>,
    writes: Arc<Mutex<()>>,
    hasher: CredentialHasher,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(CredentialHasher::default())
    }
}

impl InMemoryStore {
    pub fn new(hasher: CredentialHasher) -> Self {
        Self {
            tenants: Arc::default(),
            subdomains: Arc::default(),
            tokens: Arc::default(),
            secrets: Arc::default(),
            accounts: Arc::default(),
            emails: Arc::default(),
            enrollments: Arc::default(),
            identities: Arc::default(),
            credentials: Arc::default(),
            writes: Arc::default(),
            hasher,
        }
    }

    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>, CoreError> {
        self.writes
            .lock()
            .map_err(|_| CoreError::Internal("in-memory store lock poisoned".into()))
    }

    fn hash_credential(&self, account: &NewAccount) -> Result<Option<String>, CoreError> {
        account
            .credential
            .as_ref()
            .map(|c| self.hasher.hash(&c.password))
            .transpose()
    }

    fn insert_token(&self, token: InvitationToken) -> Result<(), CoreError> {
        match self.secrets.entry(token.secret_hash.clone()) {
            Entry::Occupied(_) => Err(CoreError::Internal("invitation secret collision".into())),
            Entry::Vacant(slot) => {
                slot.insert(token.id);
                self.tokens.insert(token.id, token);
                Ok(())
            }
        }
    }

    fn attach_identity(
        &self,
        account_id: Uuid,
        login_email: &str,
        password_hash: String,
    ) -> Uuid {
        let identity_id = Uuid::new_v4();
        self.credentials.insert(
            login_email.to_string(),
            CredentialRecord {
                identity_id,
                password_hash,
            },
        );
        self.identities.insert(
            identity_id,
            IdentityRecord {
                account_id,
                login_email: login_email.to_string(),
            },
        );
        identity_id
    }

    /// Creates or activates a profile. Caller holds `writes`.
    ///
    /// Returns the profile and whether an existing one was activated.
    fn enroll(
        &self,
        account: &NewAccount,
        password_hash: Option<String>,
        allow_activation: bool,
    ) -> Result<(AccountProfile, bool), CoreError> {
        let existing_id = match (account.tenant_id, &account.enrollment_id) {
            (Some(tenant_id), Some(enrollment_id)) if account.role.is_self_enrolling() => self
                .enrollments
                .get(&(tenant_id, enrollment_id.clone()))
                .map(|r| *r),
            _ => self.emails.get(&account.email).map(|r| *r),
        };

        if let Some(existing_id) = existing_id {
            let existing = self
                .accounts
                .get(&existing_id)
                .map(|r| r.clone())
                .ok_or_else(|| CoreError::Internal("dangling account index".into()))?;
            let (credential, hash) = match (&account.credential, password_hash) {
                (Some(c), Some(h)) if allow_activation && can_activate(&existing, account) => (c, h),
                _ => return Err(CoreError::DuplicateAccount),
            };
            if self.credentials.contains_key(&credential.login_email) {
                return Err(CoreError::DuplicateAccount);
            }
            let identity_id = self.attach_identity(existing_id, &credential.login_email, hash);
            let mut profile = self
                .accounts
                .get_mut(&existing_id)
                .ok_or_else(|| CoreError::Internal("dangling account index".into()))?;
            profile.auth_identity_id = Some(identity_id);
            debug!(account_id = %existing_id, "Activated pre-registered profile");
            return Ok((profile.clone(), true));
        }

        if self.emails.contains_key(&account.email) {
            return Err(CoreError::DuplicateAccount);
        }
        let enrollment_key = match (account.tenant_id, &account.enrollment_id) {
            (Some(tenant_id), Some(enrollment_id)) => Some((tenant_id, enrollment_id.clone())),
            _ => None,
        };
        if let Some(key) = &enrollment_key {
            if self.enrollments.contains_key(key) {
                return Err(CoreError::DuplicateAccount);
            }
        }
        if let Some(credential) = &account.credential {
            if self.credentials.contains_key(&credential.login_email) {
                return Err(CoreError::DuplicateAccount);
            }
        }

        let account_id = Uuid::new_v4();
        let auth_identity_id = match (&account.credential, password_hash) {
            (Some(c), Some(hash)) => Some(self.attach_identity(account_id, &c.login_email, hash)),
            _ => None,
        };
        let profile = AccountProfile {
            id: account_id,
            tenant_id: account.tenant_id,
            name: account.name.clone(),
            email: account.email.clone(),
            enrollment_id: account.enrollment_id.clone(),
            auth_identity_id,
            role: account.role,
        };
        self.emails.insert(profile.email.clone(), account_id);
        if let Some(key) = enrollment_key {
            self.enrollments.insert(key, account_id);
        }
        self.accounts.insert(account_id, profile.clone());
        Ok((profile, false))
    }
}

#[async_trait]
impl TenantRepository for InMemoryStore {
    async fn create(&self, tenant: Tenant) -> Result<Tenant, CoreError> {
        match self.subdomains.entry(tenant.subdomain.clone()) {
            Entry::Occupied(_) => Err(CoreError::DuplicateSubdomain(tenant.subdomain)),
            Entry::Vacant(slot) => {
                slot.insert(tenant.id);
                self.tenants.insert(tenant.id, tenant.clone());
                Ok(tenant)
            }
        }
    }

    async fn create_with_bootstrap(
        &self,
        tenant: Tenant,
        invitation: InvitationToken,
    ) -> Result<Tenant, CoreError> {
        if invitation.tenant_id != tenant.id || invitation.kind != InvitationKind::TenantBootstrap {
            return Err(CoreError::Internal(
                "bootstrap invitation does not belong to the tenant".into(),
            ));
        }
        match self.subdomains.entry(tenant.subdomain.clone()) {
            Entry::Occupied(_) => Err(CoreError::DuplicateSubdomain(tenant.subdomain)),
            Entry::Vacant(slot) => {
                // the token goes in first so a collision leaves no tenant behind
                self.insert_token(invitation)?;
                slot.insert(tenant.id);
                self.tenants.insert(tenant.id, tenant.clone());
                Ok(tenant)
            }
        }
    }

    async fn get_by_subdomain(&self, subdomain: &str) -> Result<Tenant, CoreError> {
        let key = subdomain.trim().to_lowercase();
        let id = self
            .subdomains
            .get(&key)
            .map(|r| *r)
            .ok_or_else(|| CoreError::TenantNotFound(key.clone()))?;
        self.tenants
            .get(&id)
            .map(|r| r.clone())
            .ok_or(CoreError::TenantNotFound(key))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Tenant, CoreError> {
        self.tenants
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| CoreError::TenantNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Tenant>, CoreError> {
        let mut tenants: Vec<Tenant> = self.tenants.iter().map(|r| r.value().clone()).collect();
        tenants.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tenants)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Tenant, CoreError> {
        let mut tenant = self
            .tenants
            .get_mut(&id)
            .ok_or_else(|| CoreError::TenantNotFound(id.to_string()))?;
        tenant.active = active;
        Ok(tenant.clone())
    }
}

#[async_trait]
impl InvitationRepository for InMemoryStore {
    async fn insert(&self, token: InvitationToken) -> Result<(), CoreError> {
        self.insert_token(token)
    }

    async fn find_by_secret_hash(
        &self,
        secret_hash: &str,
    ) -> Result<Option<InvitationToken>, CoreError> {
        let id = match self.secrets.get(secret_hash) {
            Some(r) => *r,
            None => return Ok(None),
        };
        Ok(self.tokens.get(&id).map(|r| r.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<InvitationToken>, CoreError> {
        Ok(self.tokens.get(&id).map(|r| r.clone()))
    }

    async fn list_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<InvitationToken>, CoreError> {
        let mut tokens: Vec<InvitationToken> = self
            .tokens
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.value().clone())
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), CoreError> {
        let mut token = self
            .tokens
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("invitation {}", id)))?;
        token.active = false;
        Ok(())
    }

    async fn delete_unused(&self, id: Uuid) -> Result<bool, CoreError> {
        match self.tokens.remove_if(&id, |_, t| t.consumed_by.is_none()) {
            Some((_, token)) => {
                self.secrets.remove(&token.secret_hash);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_bootstrap(&self, token: InvitationToken) -> Result<(), CoreError> {
        let _guard = self.lock_writes()?;
        if !self.tenants.contains_key(&token.tenant_id) {
            return Err(CoreError::TenantNotFound(token.tenant_id.to_string()));
        }
        let claimed = self.accounts.iter().any(|a| {
            a.tenant_id == Some(token.tenant_id)
                && a.role == Role::Administrator
                && a.is_activated()
        });
        if claimed {
            return Err(CoreError::Validation(
                "tenant already has an administrator".into(),
            ));
        }
        for mut entry in self.tokens.iter_mut() {
            if entry.tenant_id == token.tenant_id
                && entry.kind == InvitationKind::TenantBootstrap
                && entry.consumed_by.is_none()
            {
                entry.active = false;
            }
        }
        self.insert_token(token)
    }

    async fn redeem(&self, redemption: Redemption) -> Result<RedeemedAccount, CoreError> {
        let password_hash = self.hash_credential(&redemption.account)?;

        let _guard = self.lock_writes()?;
        let token_id = self
            .secrets
            .get(&redemption.secret_hash)
            .map(|r| *r)
            .ok_or(TokenError::NotFound)?;
        let mut token = self.tokens.get_mut(&token_id).ok_or(TokenError::NotFound)?;
        if token.kind != redemption.kind {
            return Err(TokenError::NotFound.into());
        }
        token.check_usable(redemption.now)?;
        if redemption.account.tenant_id != Some(token.tenant_id)
            || redemption.account.role != token.target_role
        {
            return Err(CoreError::Validation(
                "account does not match the invitation".into(),
            ));
        }

        let (account, activated_existing) = self.enroll(&redemption.account, password_hash, true)?;
        token.consumed_by = Some(account.id);
        token.consumed_at = Some(redemption.now);

        Ok(RedeemedAccount {
            account,
            token_id,
            activated_existing,
        })
    }
}

#[async_trait]
impl AccountRepository for InMemoryStore {
    async fn create_account(&self, account: NewAccount) -> Result<AccountProfile, CoreError> {
        let password_hash = self.hash_credential(&account)?;
        let _guard = self.lock_writes()?;
        let (profile, _) = self.enroll(&account, password_hash, false)?;
        Ok(profile)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccountProfile>, CoreError> {
        Ok(self.accounts.get(&id).map(|r| r.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AccountProfile>, CoreError> {
        let id = match self.emails.get(&normalize_email(email)) {
            Some(r) => *r,
            None => return Ok(None),
        };
        Ok(self.accounts.get(&id).map(|r| r.clone()))
    }

    async fn find_by_enrollment_id(
        &self,
        tenant_id: Uuid,
        enrollment_id: &str,
    ) -> Result<Option<AccountProfile>, CoreError> {
        let id = match self.enrollments.get(&(tenant_id, enrollment_id.to_string())) {
            Some(r) => *r,
            None => return Ok(None),
        };
        Ok(self.accounts.get(&id).map(|r| r.clone()))
    }

    async fn find_by_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<AccountProfile>, CoreError> {
        let account_id = match self.identities.get(&identity_id) {
            Some(r) => r.account_id,
            None => return Ok(None),
        };
        Ok(self.accounts.get(&account_id).map(|r| r.clone()))
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<AccountProfile>, CoreError> {
        let mut accounts: Vec<AccountProfile> = self
            .accounts
            .iter()
            .filter(|r| r.tenant_id == Some(tenant_id))
            .map(|r| r.value().clone())
            .collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(accounts)
    }

    async fn update(&self, id: Uuid, update: AccountUpdate) -> Result<AccountProfile, CoreError> {
        let _guard = self.lock_writes()?;
        let current = self
            .accounts
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| CoreError::NotFound(format!("account {}", id)))?;

        let mut updated = current.clone();
        if let Some(name) = update.name {
            updated.name = name;
        }
        if let Some(email) = update.email {
            if email != current.email {
                if self.emails.contains_key(&email) {
                    return Err(CoreError::DuplicateAccount);
                }
                self.emails.remove(&current.email);
                self.emails.insert(email.clone(), id);
                updated.email = email;
            }
        }
        self.accounts.insert(id, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        let _guard = self.lock_writes()?;
        let (_, profile) = self
            .accounts
            .remove(&id)
            .ok_or_else(|| CoreError::NotFound(format!("account {}", id)))?;
        self.emails.remove(&profile.email);
        if let (Some(tenant_id), Some(enrollment_id)) = (profile.tenant_id, profile.enrollment_id) {
            self.enrollments.remove(&(tenant_id, enrollment_id));
        }
        if let Some(identity_id) = profile.auth_identity_id {
            if let Some((_, identity)) = self.identities.remove(&identity_id) {
                self.credentials.remove(&identity.login_email);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn authenticate(&self, login_email: &str, password: &str) -> Result<Uuid, CoreError> {
        let record = self
            .credentials
            .get(&normalize_email(login_email))
            .map(|r| r.clone())
            .ok_or(CoreError::InvalidCredentials)?;
        if self.hasher.verify(password, &record.password_hash)? {
            Ok(record.identity_id)
        } else {
            Err(CoreError::InvalidCredentials)
        }
    }
}
