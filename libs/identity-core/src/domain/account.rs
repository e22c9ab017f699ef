use crate::{CoreError, domain::invitation::InvitationKind, domain::role::Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Minimum length for passwords, and for enrollment ids that double as one.
pub const MIN_SECRET_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProfile {
    pub id: Uuid,
    /// `None` only for tenant operators.
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub enrollment_id: Option<String>,
    pub auth_identity_id: Option<Uuid>,
    pub role: Role,
}

impl AccountProfile {
    pub fn is_activated(&self) -> bool {
        self.auth_identity_id.is_some()
    }
}

// --- Errors ---

#[derive(thiserror::Error, Debug)]
pub enum AccountError {
    #[error("Core Error: {0}")]
    Core(#[from] CoreError),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("enrollment id must have at least {} characters", MIN_SECRET_LEN)]
    EnrollmentIdTooShort,
    #[error("password must have at least {} characters", MIN_SECRET_LEN)]
    PasswordTooShort,
    #[error("password and confirmation do not match")]
    PasswordMismatch,
    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),
    #[error("this invitation is for the {0} role")]
    RoleMismatch(Role),
}

// --- Normalization ---

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Removes every whitespace character, not only the outer ones.
pub fn normalize_enrollment_id(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Login email for accounts that sign in with an enrollment id.
///
/// The tenant subdomain is part of the address so that the same student
/// number can exist in two schools.
pub fn synthetic_email(enrollment_id: &str, subdomain: &str, placeholder_domain: &str) -> String {
    normalize_email(&format!("{}@{}.{}", enrollment_id, subdomain, placeholder_domain))
}

/// Normalizes and checks an email address.
pub fn parse_email(raw: &str) -> Result<String, AccountError> {
    let email = normalize_email(raw);
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(AccountError::InvalidEmail(email))
    }
}

fn required(value: Option<&str>, field: &'static str) -> Result<String, AccountError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AccountError::MissingField(field)),
    }
}

// --- Registration details ---

/// Fields submitted with an invitation redemption.
#[derive(Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
    pub enrollment_id: Option<String>,
}

impl fmt::Debug for RegistrationForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationForm")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("enrollment_id", &self.enrollment_id)
            .finish_non_exhaustive()
    }
}

/// Validated, normalized account details.
#[derive(Clone, PartialEq, Eq)]
pub enum AccountDetails {
    /// Learners: the enrollment id is both username and initial password.
    SelfEnrolled { name: String, enrollment_id: String },
    Credentialed {
        name: String,
        email: String,
        password: String,
    },
}

impl fmt::Debug for AccountDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountDetails::SelfEnrolled { name, enrollment_id } => f
                .debug_struct("SelfEnrolled")
                .field("name", name)
                .field("enrollment_id", enrollment_id)
                .finish(),
            AccountDetails::Credentialed { name, email, .. } => f
                .debug_struct("Credentialed")
                .field("name", name)
                .field("email", email)
                .finish_non_exhaustive(),
        }
    }
}

impl AccountDetails {
    /// Pure validation; runs before anything touches a store.
    ///
    /// A form that carries an enrollment id and no password is a
    /// self-enrollment, anything else needs email, password and confirmation.
    pub fn from_form(form: &RegistrationForm) -> Result<Self, AccountError> {
        let name = required(form.name.as_deref(), "name")?;
        let has_enrollment = form
            .enrollment_id
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty());

        if has_enrollment && form.password.is_none() {
            let enrollment_id = normalize_enrollment_id(form.enrollment_id.as_deref().unwrap_or_default());
            if enrollment_id.chars().count() < MIN_SECRET_LEN {
                return Err(AccountError::EnrollmentIdTooShort);
            }
            return Ok(AccountDetails::SelfEnrolled { name, enrollment_id });
        }

        let email = parse_email(&required(form.email.as_deref(), "email")?)?;
        let password = form.password.clone().ok_or(AccountError::MissingField("password"))?;
        let confirm = form
            .confirm_password
            .as_deref()
            .ok_or(AccountError::MissingField("confirmPassword"))?;
        if password.chars().count() < MIN_SECRET_LEN {
            return Err(AccountError::PasswordTooShort);
        }
        if password != confirm {
            return Err(AccountError::PasswordMismatch);
        }
        Ok(AccountDetails::Credentialed { name, email, password })
    }

    /// Fails unless the shape fits the invited role.
    pub fn ensure_fits(&self, role: Role) -> Result<(), AccountError> {
        let self_enrolled = matches!(self, AccountDetails::SelfEnrolled { .. });
        if self_enrolled == role.is_self_enrolling() {
            Ok(())
        } else {
            Err(AccountError::RoleMismatch(role))
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AccountDetails::SelfEnrolled { name, .. } | AccountDetails::Credentialed { name, .. } => name,
        }
    }
}

// --- Store inputs and outputs ---

/// Authentication identity to create alongside a profile.
#[derive(Clone)]
pub struct NewCredential {
    pub login_email: String,
    pub password: String,
}

impl fmt::Debug for NewCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewCredential")
            .field("login_email", &self.login_email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub tenant_id: Option<Uuid>,
    pub role: Role,
    pub name: String,
    pub email: String,
    pub enrollment_id: Option<String>,
    pub credential: Option<NewCredential>,
}

/// Input to the atomic consume-and-enroll step.
#[derive(Debug, Clone)]
pub struct Redemption {
    pub secret_hash: String,
    pub kind: InvitationKind,
    pub now: DateTime<Utc>,
    pub account: NewAccount,
}

#[derive(Debug, Clone)]
pub struct RedeemedAccount {
    pub account: AccountProfile,
    pub token_id: Uuid,
    /// True when a pre-registered profile was activated instead of created.
    pub activated_existing: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Whether `existing` is a pre-registered profile that `incoming` may
/// activate: same tenant, same role, no identity yet, matching key.
pub fn can_activate(existing: &AccountProfile, incoming: &NewAccount) -> bool {
    if existing.is_activated()
        || existing.tenant_id != incoming.tenant_id
        || existing.role != incoming.role
    {
        return false;
    }
    if incoming.role.is_self_enrolling() {
        existing.enrollment_id.is_some() && existing.enrollment_id == incoming.enrollment_id
    } else {
        existing.email == incoming.email
    }
}

// --- Login identifiers ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginIdentifier {
    Email(String),
    EnrollmentId(String),
}

impl LoginIdentifier {
    pub fn parse(raw: &str) -> Self {
        if raw.contains('@') {
            LoginIdentifier::Email(normalize_email(raw))
        } else {
            LoginIdentifier::EnrollmentId(normalize_enrollment_id(raw))
        }
    }
}

/// Emails to try for an enrollment-id login, in order and de-duplicated.
pub fn login_candidates(on_file: Option<&str>, synthetic: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::with_capacity(2);
    for email in on_file.into_iter().chain(std::iter::once(synthetic)) {
        let email = normalize_email(email);
        if !email.is_empty() && !candidates.contains(&email) {
            candidates.push(email);
        }
    }
    candidates
}
