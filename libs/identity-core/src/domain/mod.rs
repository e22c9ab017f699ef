pub mod account;
pub mod credential;
pub mod invitation;
pub mod role;
pub mod tenant;
