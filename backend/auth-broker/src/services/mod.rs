/// Upstream identity provider clients
///
/// - RADIUS Access-Request over UDP
/// - OAuth 2.0 profile sources (GitHub code flow, passthrough)
/// - OpenID Connect relying party (Google, discovered issuers)
pub mod oauth;
pub mod oidc;
pub mod radius;

pub use oauth::{GithubProfileSource, PassthroughProfileSource};
pub use oidc::{OidcProfileSource, ProviderEndpoints};
pub use radius::UdpRadiusClient;
