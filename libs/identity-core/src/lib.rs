use async_trait::async_trait;
use std::error::Error as StdError;
use uuid::Uuid;

// Declare modules
pub mod adapters;
pub mod domain;

use domain::{
    account::{AccountError, AccountProfile, AccountUpdate, NewAccount, RedeemedAccount, Redemption},
    invitation::{InvitationToken, TokenError},
    tenant::{Tenant, TenantError},
};

// Common error type for the identity core
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Invitation rejected: {0}")]
    Token(#[from] TokenError),
    #[error("An account with these details already exists")]
    DuplicateAccount,
    #[error("Subdomain already taken: {0}")]
    DuplicateSubdomain(String),
    #[error("Account exists but has not been activated")]
    NotActivated,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] Box<dyn StdError + Send + Sync>),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

// This allows '?' to convert domain errors into CoreError in handlers
impl From<TenantError> for CoreError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::Core(ce) => ce,
            TenantError::InvalidSubdomain(msg) | TenantError::InvalidInput(msg) => {
                CoreError::Validation(msg)
            }
        }
    }
}

impl From<AccountError> for CoreError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Core(ce) => ce,
            other => CoreError::Validation(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Infrastructure(Box::new(err))
    }
}

/// Port for tenant persistence.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn create(&self, tenant: Tenant) -> Result<Tenant, CoreError>;

    /// Creates the tenant and its bootstrap invitation as one unit.
    /// Neither record is visible if either insert fails.
    async fn create_with_bootstrap(
        &self,
        tenant: Tenant,
        invitation: InvitationToken,
    ) -> Result<Tenant, CoreError>;

    /// Fails with `CoreError::TenantNotFound` when no tenant owns the subdomain.
    async fn get_by_subdomain(&self, subdomain: &str) -> Result<Tenant, CoreError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Tenant, CoreError>;
    async fn list(&self) -> Result<Vec<Tenant>, CoreError>;
    async fn set_active(&self, id: Uuid, active: bool) -> Result<Tenant, CoreError>;
}

/// Port for invitation token persistence.
///
/// Tokens are addressed by the SHA-256 digest of their secret; the
/// plaintext never reaches the store.
#[async_trait]
pub trait InvitationRepository: Send + Sync {
    async fn insert(&self, token: InvitationToken) -> Result<(), CoreError>;
    async fn find_by_secret_hash(
        &self,
        secret_hash: &str,
    ) -> Result<Option<InvitationToken>, CoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<InvitationToken>, CoreError>;
    async fn list_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<InvitationToken>, CoreError>;

    /// Sets `active = false`. Deactivating an inactive token is a no-op.
    async fn deactivate(&self, id: Uuid) -> Result<(), CoreError>;

    /// Deletes the token only while `consumed_by` is unset.
    /// Returns `false` when nothing was deleted.
    async fn delete_unused(&self, id: Uuid) -> Result<bool, CoreError>;

    /// Deactivates every outstanding bootstrap invitation of the token's
    /// tenant and inserts `token`, atomically.
    ///
    /// Fails with `Validation` once the tenant has an activated
    /// administrator; a concurrent bootstrap redemption either lands before
    /// the check or finds its token deactivated.
    async fn replace_bootstrap(&self, token: InvitationToken) -> Result<(), CoreError>;

    /// Consumes the token and enrolls the account in a single unit of work.
    ///
    /// The consume is a conditional write: it succeeds only while the token
    /// is active, unconsumed and unexpired. When the enrollment violates a
    /// uniqueness constraint the consume is rolled back as well.
    async fn redeem(&self, redemption: Redemption) -> Result<RedeemedAccount, CoreError>;
}

/// Port for account profiles.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Creates a profile, and its authentication identity when the account
    /// carries a credential.
    async fn create_account(&self, account: NewAccount) -> Result<AccountProfile, CoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccountProfile>, CoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<AccountProfile>, CoreError>;
    async fn find_by_enrollment_id(
        &self,
        tenant_id: Uuid,
        enrollment_id: &str,
    ) -> Result<Option<AccountProfile>, CoreError>;
    async fn find_by_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<AccountProfile>, CoreError>;
    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<AccountProfile>, CoreError>;
    async fn update(&self, id: Uuid, update: AccountUpdate) -> Result<AccountProfile, CoreError>;
    /// Removes the profile together with its authentication identity.
    async fn delete(&self, id: Uuid) -> Result<(), CoreError>;
}

/// Port for the authentication backend.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the identity id on success and `CoreError::InvalidCredentials`
    /// when the email is unknown or the password does not match. Any other
    /// error means the backend could not answer.
    async fn authenticate(&self, login_email: &str, password: &str) -> Result<Uuid, CoreError>;
}

// Port for caching data
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError>;
    async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>)
    -> Result<(), CoreError>;
    async fn delete(&self, key: &str) -> Result<(), CoreError>;
}
