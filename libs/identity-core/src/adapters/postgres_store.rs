use crate::{
    AccountRepository, CoreError, CredentialStore, InvitationRepository, TenantRepository,
    domain::{
        account::{
            AccountProfile, AccountUpdate, NewAccount, RedeemedAccount, Redemption, can_activate,
            normalize_email,
        },
        credential::CredentialHasher,
        invitation::{InvitationKind, InvitationToken, TokenError},
        tenant::Tenant,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

const TENANT_COLUMNS: &str = "id, name, subdomain, schema_name, plan, active, created_at";
const TOKEN_COLUMNS: &str = "id, secret_hash, tenant_id, target_role, kind, issued_by, \
     recipient_email, created_at, expires_at, active, consumed_by, consumed_at";
const PROFILE_COLUMNS: &str = "id, tenant_id, name, email, enrollment_id, auth_identity_id, role";

#[derive(sqlx::FromRow, Debug)]
struct TenantRow {
    id: Uuid,
    name: String,
    subdomain: String,
    schema_name: String,
    plan: String,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Tenant {
            id: row.id,
            name: row.name,
            subdomain: row.subdomain,
            schema_name: row.schema_name,
            plan: row.plan,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow, Debug)]
struct TokenRow {
    id: Uuid,
    secret_hash: String,
    tenant_id: Uuid,
    target_role: String,
    kind: String,
    issued_by: Option<Uuid>,
    recipient_email: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    active: bool,
    consumed_by: Option<Uuid>,
    consumed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TokenRow> for InvitationToken {
    type Error = CoreError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        let kind = InvitationKind::parse(&row.kind)
            .ok_or_else(|| CoreError::Internal(format!("unknown invitation kind {}", row.kind)))?;
        Ok(InvitationToken {
            id: row.id,
            secret_hash: row.secret_hash,
            tenant_id: row.tenant_id,
            target_role: row.target_role.parse()?,
            kind,
            issued_by: row.issued_by,
            recipient_email: row.recipient_email,
            created_at: row.created_at,
            expires_at: row.expires_at,
            active: row.active,
            consumed_by: row.consumed_by,
            consumed_at: row.consumed_at,
        })
    }
}

#[derive(sqlx::FromRow, Debug)]
struct ProfileRow {
    id: Uuid,
    tenant_id: Option<Uuid>,
    name: String,
    email: String,
    enrollment_id: Option<String>,
    auth_identity_id: Option<Uuid>,
    role: String,
}

impl TryFrom<ProfileRow> for AccountProfile {
    type Error = CoreError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(AccountProfile {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            email: row.email,
            enrollment_id: row.enrollment_id,
            auth_identity_id: row.auth_identity_id,
            role: row.role.parse()?,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Maps a uniqueness violation to `on_conflict`, anything else to an
/// infrastructure error.
fn conflict_or(err: sqlx::Error, on_conflict: CoreError) -> CoreError {
    if is_unique_violation(&err) {
        on_conflict
    } else {
        CoreError::Infrastructure(Box::new(err))
    }
}

/// PostgreSQL implementation of the store ports using sqlx.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    hasher: CredentialHasher,
}

impl PostgresStore {
    pub fn new(pool: PgPool, hasher: CredentialHasher) -> Self {
        Self { pool, hasher }
    }

    /// Applies the embedded migrations.
    pub async fn migrate(&self) -> Result<(), CoreError> {
        info!("Applying identity migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::Infrastructure(Box::new(e)))?;
        Ok(())
    }

    async fn insert_token_tx(
        tx: &mut Transaction<'_, Postgres>,
        token: &InvitationToken,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO invitation_tokens (id, secret_hash, tenant_id, target_role, kind, issued_by, \
             recipient_email, created_at, expires_at, active, consumed_by, consumed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(token.id)
        .bind(&token.secret_hash)
        .bind(token.tenant_id)
        .bind(token.target_role.as_str())
        .bind(token.kind.as_str())
        .bind(token.issued_by)
        .bind(&token.recipient_email)
        .bind(token.created_at)
        .bind(token.expires_at)
        .bind(token.active)
        .bind(token.consumed_by)
        .bind(token.consumed_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| conflict_or(e, CoreError::Internal("invitation secret collision".into())))?;
        Ok(())
    }

    async fn insert_identity_tx(
        tx: &mut Transaction<'_, Postgres>,
        login_email: &str,
        password_hash: &str,
    ) -> Result<Uuid, CoreError> {
        let identity_id = Uuid::new_v4();
        sqlx::query("INSERT INTO auth_identities (id, login_email, password_hash) VALUES ($1, $2, $3)")
            .bind(identity_id)
            .bind(login_email)
            .bind(password_hash)
            .execute(&mut **tx)
            .await
            .map_err(|e| conflict_or(e, CoreError::DuplicateAccount))?;
        Ok(identity_id)
    }

    async fn insert_profile_tx(
        tx: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
        account: &NewAccount,
        auth_identity_id: Option<Uuid>,
    ) -> Result<AccountProfile, CoreError> {
        let row: ProfileRow = sqlx::query_as(&format!(
            "INSERT INTO account_profiles (id, tenant_id, name, email, enrollment_id, auth_identity_id, role) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            PROFILE_COLUMNS
        ))
        .bind(account_id)
        .bind(account.tenant_id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.enrollment_id)
        .bind(auth_identity_id)
        .bind(account.role.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| conflict_or(e, CoreError::DuplicateAccount))?;
        row.try_into()
    }

    /// Profile a redemption would activate instead of creating a new one.
    async fn activation_candidate_tx(
        tx: &mut Transaction<'_, Postgres>,
        account: &NewAccount,
    ) -> Result<Option<AccountProfile>, CoreError> {
        let row: Option<ProfileRow> = match (account.tenant_id, &account.enrollment_id) {
            (Some(tenant_id), Some(enrollment_id)) if account.role.is_self_enrolling() => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM account_profiles WHERE tenant_id = $1 AND enrollment_id = $2 FOR UPDATE",
                    PROFILE_COLUMNS
                ))
                .bind(tenant_id)
                .bind(enrollment_id)
                .fetch_optional(&mut **tx)
                .await?
            }
            _ => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM account_profiles WHERE email = $1 FOR UPDATE",
                    PROFILE_COLUMNS
                ))
                .bind(&account.email)
                .fetch_optional(&mut **tx)
                .await?
            }
        };
        row.map(AccountProfile::try_from).transpose()
    }

    /// Explains why the conditional consume matched no row.
    /// Row-locks the tenant until the transaction ends. Bootstrap redemption
    /// and bootstrap replacement both take this lock first.
    async fn lock_tenant_tx(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
    ) -> Result<bool, CoreError> {
        let locked: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM tenants WHERE id = $1 FOR UPDATE")
                .bind(tenant_id)
                .fetch_optional(&mut **tx)
                .await?;
        Ok(locked.is_some())
    }

    async fn diagnose_unusable(
        tx: &mut Transaction<'_, Postgres>,
        redemption: &Redemption,
    ) -> Result<TokenError, CoreError> {
        let row: Option<TokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invitation_tokens WHERE secret_hash = $1",
            TOKEN_COLUMNS
        ))
        .bind(&redemption.secret_hash)
        .fetch_optional(&mut **tx)
        .await?;
        let token = match row {
            Some(row) => InvitationToken::try_from(row)?,
            None => return Ok(TokenError::NotFound),
        };
        if token.kind != redemption.kind {
            return Ok(TokenError::NotFound);
        }
        Ok(token
            .check_usable(redemption.now)
            .err()
            .unwrap_or(TokenError::AlreadyUsed))
    }

    async fn enroll_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        account: &NewAccount,
        password_hash: Option<String>,
    ) -> Result<AccountProfile, CoreError> {
        let identity_id = match (&account.credential, password_hash) {
            (Some(c), Some(hash)) => Some(Self::insert_identity_tx(tx, &c.login_email, &hash).await?),
            _ => None,
        };
        Self::insert_profile_tx(tx, Uuid::new_v4(), account, identity_id).await
    }

    fn hash_credential(&self, account: &NewAccount) -> Result<Option<String>, CoreError> {
        account
            .credential
            .as_ref()
            .map(|c| self.hasher.hash(&c.password))
            .transpose()
    }
}

#[async_trait]
impl TenantRepository for PostgresStore {
    async fn create(&self, tenant: Tenant) -> Result<Tenant, CoreError> {
        let row: TenantRow = sqlx::query_as(&format!(
            "INSERT INTO tenants ({0}) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {0}",
            TENANT_COLUMNS
        ))
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.subdomain)
        .bind(&tenant.schema_name)
        .bind(&tenant.plan)
        .bind(tenant.active)
        .bind(tenant.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_or(e, CoreError::DuplicateSubdomain(tenant.subdomain.clone())))?;
        Ok(row.into())
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
        let mut tx = self.pool.begin().await?;

        let row: TenantRow = sqlx::query_as(&format!(
            "INSERT INTO tenants ({0}) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {0}",
            TENANT_COLUMNS
        ))
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.subdomain)
        .bind(&tenant.schema_name)
        .bind(&tenant.plan)
        .bind(tenant.active)
        .bind(tenant.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, CoreError::DuplicateSubdomain(tenant.subdomain.clone())))?;

        Self::insert_token_tx(&mut tx, &invitation).await?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn get_by_subdomain(&self, subdomain: &str) -> Result<Tenant, CoreError> {
        let key = subdomain.trim().to_lowercase();
        let row: Option<TenantRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tenants WHERE subdomain = $1",
            TENANT_COLUMNS
        ))
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Tenant::from).ok_or(CoreError::TenantNotFound(key))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Tenant, CoreError> {
        let row: Option<TenantRow> =
            sqlx::query_as(&format!("SELECT {} FROM tenants WHERE id = $1", TENANT_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Tenant::from)
            .ok_or_else(|| CoreError::TenantNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Tenant>, CoreError> {
        let rows: Vec<TenantRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tenants ORDER BY created_at ASC",
            TENANT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Tenant::from).collect())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Tenant, CoreError> {
        let row: Option<TenantRow> = sqlx::query_as(&format!(
            "UPDATE tenants SET active = $2 WHERE id = $1 RETURNING {}",
            TENANT_COLUMNS
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Tenant::from)
            .ok_or_else(|| CoreError::TenantNotFound(id.to_string()))
    }
}

#[async_trait]
impl InvitationRepository for PostgresStore {
    async fn insert(&self, token: InvitationToken) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_token_tx(&mut tx, &token).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_secret_hash(
        &self,
        secret_hash: &str,
    ) -> Result<Option<InvitationToken>, CoreError> {
        let row: Option<TokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invitation_tokens WHERE secret_hash = $1",
            TOKEN_COLUMNS
        ))
        .bind(secret_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(InvitationToken::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<InvitationToken>, CoreError> {
        let row: Option<TokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invitation_tokens WHERE id = $1",
            TOKEN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(InvitationToken::try_from).transpose()
    }

    async fn list_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<InvitationToken>, CoreError> {
        let rows: Vec<TokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invitation_tokens WHERE tenant_id = $1 ORDER BY created_at DESC",
            TOKEN_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InvitationToken::try_from).collect()
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE invitation_tokens SET active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("invitation {}", id)));
        }
        Ok(())
    }

    async fn delete_unused(&self, id: Uuid) -> Result<bool, CoreError> {
        let result =
            sqlx::query("DELETE FROM invitation_tokens WHERE id = $1 AND consumed_by IS NULL")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn replace_bootstrap(&self, token: InvitationToken) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;
        if !Self::lock_tenant_tx(&mut tx, token.tenant_id).await? {
            return Err(CoreError::TenantNotFound(token.tenant_id.to_string()));
        }
        let (claimed,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM account_profiles \
             WHERE tenant_id = $1 AND role = 'administrator' AND auth_identity_id IS NOT NULL)",
        )
        .bind(token.tenant_id)
        .fetch_one(&mut *tx)
        .await?;
        if claimed {
            return Err(CoreError::Validation(
                "tenant already has an administrator".into(),
            ));
        }
        let deactivated = sqlx::query(
            "UPDATE invitation_tokens SET active = FALSE \
             WHERE tenant_id = $1 AND kind = 'tenantBootstrap' AND consumed_by IS NULL AND active",
        )
        .bind(token.tenant_id)
        .execute(&mut *tx)
        .await?;
        debug!(
            tenant_id = %token.tenant_id,
            deactivated = deactivated.rows_affected(),
            "Replacing bootstrap invitation"
        );
        Self::insert_token_tx(&mut tx, &token).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn redeem(&self, redemption: Redemption) -> Result<RedeemedAccount, CoreError> {
        let password_hash = self.hash_credential(&redemption.account)?;
        let account = &redemption.account;
        let mut tx = self.pool.begin().await?;
        if let (InvitationKind::TenantBootstrap, Some(tenant_id)) =
            (redemption.kind, account.tenant_id)
        {
            Self::lock_tenant_tx(&mut tx, tenant_id).await?;
        }

        // Decide between activation and creation before the consume so the
        // token can point at the final account id.
        let existing = Self::activation_candidate_tx(&mut tx, account).await?;
        let activate = match &existing {
            Some(profile) if can_activate(profile, account) && account.credential.is_some() => true,
            Some(_) => {
                tx.rollback().await?;
                return Err(CoreError::DuplicateAccount);
            }
            None => false,
        };
        let account_id = match (&existing, activate) {
            (Some(profile), true) => profile.id,
            _ => Uuid::new_v4(),
        };

        let consumed: Option<TokenRow> = sqlx::query_as(&format!(
            "UPDATE invitation_tokens SET consumed_by = $1, consumed_at = $2 \
             WHERE secret_hash = $3 AND kind = $4 AND consumed_by IS NULL AND active AND expires_at > $2 \
             RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(account_id)
        .bind(redemption.now)
        .bind(&redemption.secret_hash)
        .bind(redemption.kind.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let token = match consumed {
            Some(row) => InvitationToken::try_from(row)?,
            None => {
                let reason = Self::diagnose_unusable(&mut tx, &redemption).await?;
                tx.rollback().await?;
                return Err(reason.into());
            }
        };
        if account.tenant_id != Some(token.tenant_id) || account.role != token.target_role {
            tx.rollback().await?;
            return Err(CoreError::Validation(
                "account does not match the invitation".into(),
            ));
        }

        // Dropping the transaction on an early return rolls it back, which
        // also releases the consume.
        let profile = if activate {
            let (credential, hash) = match (&account.credential, password_hash) {
                (Some(c), Some(h)) => (c, h),
                _ => return Err(CoreError::DuplicateAccount),
            };
            let identity_id = Self::insert_identity_tx(&mut tx, &credential.login_email, &hash).await?;
            let row: ProfileRow = sqlx::query_as(&format!(
                "UPDATE account_profiles SET auth_identity_id = $2 WHERE id = $1 RETURNING {}",
                PROFILE_COLUMNS
            ))
            .bind(account_id)
            .bind(identity_id)
            .fetch_one(&mut *tx)
            .await?;
            AccountProfile::try_from(row)?
        } else {
            let identity_id = match (&account.credential, password_hash) {
                (Some(c), Some(hash)) => {
                    Some(Self::insert_identity_tx(&mut tx, &c.login_email, &hash).await?)
                }
                _ => None,
            };
            Self::insert_profile_tx(&mut tx, account_id, account, identity_id).await?
        };

        tx.commit().await?;
        Ok(RedeemedAccount {
            account: profile,
            token_id: token.id,
            activated_existing: activate,
        })
    }
}

#[async_trait]
impl AccountRepository for PostgresStore {
    async fn create_account(&self, account: NewAccount) -> Result<AccountProfile, CoreError> {
        let password_hash = self.hash_credential(&account)?;
        let mut tx = self.pool.begin().await?;
        let profile = self.enroll_tx(&mut tx, &account, password_hash).await?;
        tx.commit().await?;
        Ok(profile)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccountProfile>, CoreError> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {} FROM account_profiles WHERE id = $1",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccountProfile::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AccountProfile>, CoreError> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {} FROM account_profiles WHERE email = $1",
            PROFILE_COLUMNS
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccountProfile::try_from).transpose()
    }

    async fn find_by_enrollment_id(
        &self,
        tenant_id: Uuid,
        enrollment_id: &str,
    ) -> Result<Option<AccountProfile>, CoreError> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {} FROM account_profiles WHERE tenant_id = $1 AND enrollment_id = $2",
            PROFILE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(enrollment_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccountProfile::try_from).transpose()
    }

    async fn find_by_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<AccountProfile>, CoreError> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {} FROM account_profiles WHERE auth_identity_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(identity_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccountProfile::try_from).transpose()
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<AccountProfile>, CoreError> {
        let rows: Vec<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {} FROM account_profiles WHERE tenant_id = $1 ORDER BY name ASC",
            PROFILE_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AccountProfile::try_from).collect()
    }

    async fn update(&self, id: Uuid, update: AccountUpdate) -> Result<AccountProfile, CoreError> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "UPDATE account_profiles SET name = COALESCE($2, name), email = COALESCE($3, email) \
             WHERE id = $1 RETURNING {}",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .bind(update.name)
        .bind(update.email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| conflict_or(e, CoreError::DuplicateAccount))?;
        row.map(AccountProfile::try_from)
            .transpose()?
            .ok_or_else(|| CoreError::NotFound(format!("account {}", id)))
    }

    async fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;
        let identity: Option<(Option<Uuid>,)> =
            sqlx::query_as("DELETE FROM account_profiles WHERE id = $1 RETURNING auth_identity_id")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let identity_id = match identity {
            Some((identity_id,)) => identity_id,
            None => {
                tx.rollback().await?;
                return Err(CoreError::NotFound(format!("account {}", id)));
            }
        };
        if let Some(identity_id) = identity_id {
            sqlx::query("DELETE FROM auth_identities WHERE id = $1")
                .bind(identity_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn authenticate(&self, login_email: &str, password: &str) -> Result<Uuid, CoreError> {
        let row: Option<(Uuid, String)> =
            sqlx::query_as("SELECT id, password_hash FROM auth_identities WHERE login_email = $1")
                .bind(normalize_email(login_email))
                .fetch_optional(&self.pool)
                .await?;
        let (identity_id, password_hash) = row.ok_or(CoreError::InvalidCredentials)?;
        if self.hasher.verify(password, &password_hash)? {
            Ok(identity_id)
        } else {
            debug!("Password mismatch for existing identity");
            Err(CoreError::InvalidCredentials)
        }
    }
}
