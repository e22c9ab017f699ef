use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Tenant ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub subdomain: String,
    pub schema_name: String,
    pub plan: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

// --- Errors ---

#[derive(thiserror::Error, Debug)]
pub enum TenantError {
    #[error("Core Error: {0}")]
    Core(#[from] CoreError),
    #[error("Invalid subdomain: {0}")]
    InvalidSubdomain(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

const MAX_SUBDOMAIN_LEN: usize = 63;

impl Tenant {
    /// Validates the input and builds an active tenant with a fresh id.
    pub fn new(
        name: &str,
        subdomain: &str,
        plan: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, TenantError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TenantError::InvalidInput("Tenant name cannot be empty".into()));
        }
        let plan = plan.trim().to_lowercase();
        if plan.is_empty() {
            return Err(TenantError::InvalidInput("Plan cannot be empty".into()));
        }
        let subdomain = normalize_subdomain(subdomain)?;
        let id = Uuid::new_v4();

        Ok(Self {
            id,
            name: name.to_string(),
            subdomain,
            schema_name: schema_name_for(id),
            plan,
            active: true,
            created_at: now,
        })
    }
}

/// Schema names derive from the id only, never from user input.
pub fn schema_name_for(id: Uuid) -> String {
    format!("tenant_{}", id.simple())
}

/// Trims and lowercases, then checks DNS label rules.
pub fn normalize_subdomain(raw: &str) -> Result<String, TenantError> {
    let subdomain = raw.trim().to_lowercase();
    if subdomain.is_empty() {
        return Err(TenantError::InvalidSubdomain("subdomain cannot be empty".into()));
    }
    if subdomain.len() > MAX_SUBDOMAIN_LEN {
        return Err(TenantError::InvalidSubdomain(format!(
            "subdomain longer than {} characters",
            MAX_SUBDOMAIN_LEN
        )));
    }
    if !subdomain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(TenantError::InvalidSubdomain(format!(
            "'{}' may only contain a-z, 0-9 and '-'",
            subdomain
        )));
    }
    if subdomain.starts_with('-') || subdomain.ends_with('-') {
        return Err(TenantError::InvalidSubdomain(format!(
            "'{}' may not start or end with '-'",
            subdomain
        )));
    }
    Ok(subdomain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tenant_normalizes_subdomain() {
        let tenant = Tenant::new("Escola X", "  Escola-X ", "Trial", Utc::now()).unwrap();
        assert_eq!(tenant.subdomain, "escola-x");
        assert_eq!(tenant.plan, "trial");
        assert!(tenant.active);
    }

    #[test]
    fn test_schema_name_is_derived_from_id() {
        let tenant = Tenant::new("Escola X", "escola-x", "trial", Utc::now()).unwrap();
        assert_eq!(tenant.schema_name, format!("tenant_{}", tenant.id.simple()));
        assert!(!tenant.schema_name.contains("escola"));
    }

    #[test]
    fn test_rejects_bad_subdomains() {
        let too_long = "a".repeat(64);
        for bad in ["", "  ", "-abc", "abc-", "a_b", "a.b", "drop;table", too_long.as_str()] {
            match normalize_subdomain(bad) {
                Err(TenantError::InvalidSubdomain(_)) => {}
                other => panic!("Expected InvalidSubdomain for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_rejects_empty_name() {
        match Tenant::new("  ", "escola", "trial", Utc::now()) {
            Err(TenantError::InvalidInput(msg)) => assert!(msg.contains("name cannot be empty")),
            other => panic!("Expected InvalidInput, got {:?}", other),
        }
    }
}
