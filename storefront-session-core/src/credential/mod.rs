//! Access/refresh credential ownership and authenticated requests.

use secrecy::SecretString;

mod coordinator;
mod single_flight;

pub use coordinator::SessionCoordinator;

/// The credential pair issued at login.
///
/// Both tokens are opaque. `Debug` never prints them.
#[derive(Debug)]
pub struct Credential {
    /// Short-lived bearer token.
    pub access_token: SecretString,
    /// Longer-lived token exchanged for new access tokens.
    pub refresh_token: SecretString,
}

impl Credential {
    /// Creates a credential from the raw token strings.
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
        }
    }
}
