/// Data models for credentials and identities
pub mod principal;
pub mod user;

pub use principal::{CredentialBundle, Principal, AUTH_METHOD_ATTR};
pub use user::UserRecord;
