use identity_core::{
    CoreError,
    domain::invitation::{DEFAULT_BOOTSTRAP_TTL_HOURS, DEFAULT_INVITE_TTL_HOURS},
};
use std::{fmt, net::SocketAddr, str::FromStr};

/// Runtime configuration, read from the environment (and `.env`).
#[derive(Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    /// Tenants are served from `<subdomain>.<base_domain>`.
    pub base_domain: String,
    /// Domain used to synthesize login emails for enrollment-id accounts.
    pub placeholder_email_domain: String,
    pub invite_ttl_hours: i64,
    pub bootstrap_ttl_hours: i64,
    pub session_ttl_seconds: u64,
    pub password_pepper: Option<String>,
    pub operator_email: Option<String>,
    pub operator_password: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_url: None,
            base_domain: "localhost".to_string(),
            placeholder_email_domain: "learners.invalid".to_string(),
            invite_ttl_hours: DEFAULT_INVITE_TTL_HOURS,
            bootstrap_ttl_hours: DEFAULT_BOOTSTRAP_TTL_HOURS,
            session_ttl_seconds: 8 * 60 * 60,
            password_pepper: None,
            operator_email: None,
            operator_password: None,
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &self.database_url.as_ref().map(|_| "set"))
            .field("base_domain", &self.base_domain)
            .field("placeholder_email_domain", &self.placeholder_email_domain)
            .field("invite_ttl_hours", &self.invite_ttl_hours)
            .field("bootstrap_ttl_hours", &self.bootstrap_ttl_hours)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("password_pepper", &self.password_pepper.as_ref().map(|_| "set"))
            .field("operator_email", &self.operator_email)
            .finish_non_exhaustive()
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError> {
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Configuration(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();
        let config = Self {
            bind_addr: parse_or(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            database_url: non_empty(&lookup, "DATABASE_URL"),
            base_domain: non_empty(&lookup, "BASE_DOMAIN")
                .map(|d| d.to_lowercase())
                .unwrap_or(defaults.base_domain),
            placeholder_email_domain: non_empty(&lookup, "PLACEHOLDER_EMAIL_DOMAIN")
                .map(|d| d.to_lowercase())
                .unwrap_or(defaults.placeholder_email_domain),
            invite_ttl_hours: parse_or(&lookup, "INVITE_TTL_HOURS", defaults.invite_ttl_hours)?,
            bootstrap_ttl_hours: parse_or(
                &lookup,
                "BOOTSTRAP_TTL_HOURS",
                defaults.bootstrap_ttl_hours,
            )?,
            session_ttl_seconds: parse_or(
                &lookup,
                "SESSION_TTL_SECONDS",
                defaults.session_ttl_seconds,
            )?,
            password_pepper: non_empty(&lookup, "PASSWORD_PEPPER"),
            operator_email: non_empty(&lookup, "OPERATOR_EMAIL"),
            operator_password: non_empty(&lookup, "OPERATOR_PASSWORD"),
        };

        if config.invite_ttl_hours <= 0 || config.bootstrap_ttl_hours <= 0 {
            return Err(CoreError::Configuration(
                "invitation TTLs must be positive".into(),
            ));
        }
        if config.session_ttl_seconds == 0 {
            return Err(CoreError::Configuration(
                "SESSION_TTL_SECONDS must be positive".into(),
            ));
        }
        if config.operator_email.is_some() != config.operator_password.is_some() {
            return Err(CoreError::Configuration(
                "OPERATOR_EMAIL and OPERATOR_PASSWORD must be set together".into(),
            ));
        }
        Ok(config)
    }
}
