pub mod issue_invitation;
pub mod login;
pub mod manage_accounts;
pub mod provision_tenant;
pub mod redeem_invitation;

pub use issue_invitation::TokenIssuer;
pub use login::IdentityResolver;
pub use manage_accounts::AccountManager;
pub use provision_tenant::TenantProvisioner;
pub use redeem_invitation::TokenRedeemer;
