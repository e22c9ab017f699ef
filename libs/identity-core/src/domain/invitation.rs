//! Invitation tokens.
//!
//! A token grants the right to create exactly one account with a fixed role
//! inside a fixed tenant. Only the SHA-256 digest of the secret is stored.

use crate::domain::role::Role;
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

pub const SECRET_LEN: usize = 48;
pub const DEFAULT_INVITE_TTL_HOURS: i64 = 7 * 24;
pub const DEFAULT_BOOTSTRAP_TTL_HOURS: i64 = 72;
pub const MAX_INVITE_TTL_HOURS: i64 = 90 * 24;
pub const MAX_BOOTSTRAP_TTL_HOURS: i64 = 30 * 24;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("invitation not found")]
    NotFound,
    #[error("invitation has expired")]
    Expired,
    #[error("invitation has already been used")]
    AlreadyUsed,
    #[error("invitation is no longer active")]
    Inactive,
}

impl TokenError {
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::NotFound => "token_not_found",
            TokenError::Expired => "token_expired",
            TokenError::AlreadyUsed => "token_already_used",
            TokenError::Inactive => "token_inactive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InvitationKind {
    /// Issued by a tenant administrator.
    Member,
    /// System-issued at provisioning time for the tenant's first administrator.
    TenantBootstrap,
}

impl InvitationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationKind::Member => "member",
            InvitationKind::TenantBootstrap => "tenantBootstrap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "member" => Some(InvitationKind::Member),
            "tenantBootstrap" => Some(InvitationKind::TenantBootstrap),
            _ => None,
        }
    }
}

/// Derived status shown when listing invitations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Used,
    Inactive,
    Expired,
    Active,
}

/// Plaintext invitation secret. Handed out once, never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct InvitationSecret(String);

impl InvitationSecret {
    pub fn generate() -> Self {
        let secret: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_LEN)
            .map(char::from)
            .collect();
        Self(secret)
    }

    /// Wraps a secret presented by a client.
    pub fn from_presented(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> String {
        hash_secret(&self.0)
    }
}

impl fmt::Debug for InvitationSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InvitationSecret(..)")
    }
}

/// SHA-256 of a raw secret, hex-encoded.
pub fn hash_secret(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationToken {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub tenant_id: Uuid,
    pub target_role: Role,
    pub kind: InvitationKind,
    /// `None` for system-issued bootstrap invitations.
    pub issued_by: Option<Uuid>,
    pub recipient_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub consumed_by: Option<Uuid>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl InvitationToken {
    pub fn member(
        tenant_id: Uuid,
        target_role: Role,
        issued_by: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> (Self, InvitationSecret) {
        Self::build(
            tenant_id,
            target_role,
            InvitationKind::Member,
            Some(issued_by),
            None,
            ttl,
            now,
        )
    }

    pub fn bootstrap(
        tenant_id: Uuid,
        recipient_email: Option<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> (Self, InvitationSecret) {
        Self::build(
            tenant_id,
            Role::Administrator,
            InvitationKind::TenantBootstrap,
            None,
            recipient_email,
            ttl,
            now,
        )
    }

    fn build(
        tenant_id: Uuid,
        target_role: Role,
        kind: InvitationKind,
        issued_by: Option<Uuid>,
        recipient_email: Option<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> (Self, InvitationSecret) {
        let secret = InvitationSecret::generate();
        let token = Self {
            id: Uuid::new_v4(),
            secret_hash: secret.hash(),
            tenant_id,
            target_role,
            kind,
            issued_by,
            recipient_email,
            created_at: now,
            expires_at: now + ttl,
            active: true,
            consumed_by: None,
            consumed_at: None,
        };
        (token, secret)
    }

    /// Expiry is reported first, whatever the other flags say.
    pub fn check_usable(&self, now: DateTime<Utc>) -> Result<(), TokenError> {
        if now >= self.expires_at {
            return Err(TokenError::Expired);
        }
        if self.consumed_by.is_some() {
            return Err(TokenError::AlreadyUsed);
        }
        if !self.active {
            return Err(TokenError::Inactive);
        }
        Ok(())
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.check_usable(now).is_ok()
    }

    pub fn status(&self, now: DateTime<Utc>) -> TokenStatus {
        if self.consumed_by.is_some() {
            TokenStatus::Used
        } else if !self.active {
            TokenStatus::Inactive
        } else if now >= self.expires_at {
            TokenStatus::Expired
        } else {
            TokenStatus::Active
        }
    }
}

/// What a client needs to render the onboarding form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenContext {
    pub token_id: Uuid,
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub tenant_subdomain: String,
    pub target_role: Role,
    pub kind: InvitationKind,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub recipient_email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(now: DateTime<Utc>) -> InvitationToken {
        InvitationToken::member(
            Uuid::new_v4(),
            Role::Teacher,
            Uuid::new_v4(),
            Duration::days(7),
            now,
        )
        .0
    }

    #[test]
    fn secrets_are_long_random_and_hashed() {
        let a = InvitationSecret::generate();
        let b = InvitationSecret::generate();
        assert_eq!(a.expose().len(), SECRET_LEN);
        assert!(a.expose().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
        assert_eq!(a.hash().len(), 64);
        assert_eq!(a.hash(), hash_secret(a.expose()));
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let secret = InvitationSecret::generate();
        assert!(!format!("{:?}", secret).contains(secret.expose()));
    }

    #[test]
    fn fresh_member_token_is_usable() {
        let now = Utc::now();
        let (t, secret) =
            InvitationToken::member(Uuid::new_v4(), Role::Learner, Uuid::new_v4(), Duration::days(7), now);
        assert_eq!(t.secret_hash, secret.hash());
        assert_eq!(t.expires_at, now + Duration::days(7));
        assert!(t.is_usable(now));
        assert_eq!(t.status(now), TokenStatus::Active);
    }

    #[test]
    fn expiry_wins_over_every_other_state() {
        let now = Utc::now();
        let mut t = token(now - Duration::days(8));
        t.active = false;
        t.consumed_by = Some(Uuid::new_v4());
        assert_eq!(t.check_usable(now), Err(TokenError::Expired));
    }

    #[test]
    fn expires_exactly_at_deadline() {
        let now = Utc::now();
        let t = token(now);
        assert!(t.check_usable(t.expires_at - Duration::seconds(1)).is_ok());
        assert_eq!(t.check_usable(t.expires_at), Err(TokenError::Expired));
    }

    #[test]
    fn consumed_is_reported_before_inactive() {
        let now = Utc::now();
        let mut t = token(now);
        t.consumed_by = Some(Uuid::new_v4());
        t.active = false;
        assert_eq!(t.check_usable(now), Err(TokenError::AlreadyUsed));
        t.consumed_by = None;
        assert_eq!(t.check_usable(now), Err(TokenError::Inactive));
    }

    #[test]
    fn listing_status_prefers_used_then_inactive_then_expired() {
        let now = Utc::now();
        let mut t = token(now - Duration::days(8));
        assert_eq!(t.status(now), TokenStatus::Expired);
        t.active = false;
        assert_eq!(t.status(now), TokenStatus::Inactive);
        t.consumed_by = Some(Uuid::new_v4());
        assert_eq!(t.status(now), TokenStatus::Used);
    }

    #[test]
    fn bootstrap_is_system_issued_administrator_invite() {
        let now = Utc::now();
        let (t, _) = InvitationToken::bootstrap(
            Uuid::new_v4(),
            Some("g@x.com".into()),
            Duration::hours(72),
            now,
        );
        assert_eq!(t.kind, InvitationKind::TenantBootstrap);
        assert_eq!(t.target_role, Role::Administrator);
        assert_eq!(t.issued_by, None);
    }
}
