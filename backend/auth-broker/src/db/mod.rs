/// Persistence layer
///
/// A single JSON document holds every local account. See [`users`] for the
/// write discipline.
pub mod users;

pub use users::CredentialStore;
