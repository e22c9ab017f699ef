pub mod auth;

pub use auth::{AuthenticatedUser, bearer_token, session_auth, session_key};
