// Authentication module
// Owns the OAuth2 token lifecycle and the credentials it is built from

mod credentials;
mod error;
mod manager;
mod refresh;
mod types;

pub use credentials::{load_credential, resolve_credential, write_credential, RefreshTokenStore};
pub use error::AuthError;
pub use manager::{TokenManager, TokenSettings};
pub use refresh::{OAuthTokenEndpoint, TokenEndpoint};
pub use types::{Credential, Grant, TokenResponse, TokenState};
