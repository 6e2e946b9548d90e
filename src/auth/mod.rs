pub mod authenticator;
pub mod credential_store;
pub mod discovery;
pub mod error;
pub mod oauth_server;
pub mod pkce;
pub mod provider;
pub mod service;
pub mod token_client;
pub mod token_data;

#[cfg(test)]
pub(crate) mod test_support;

pub use authenticator::{AuthOptions, Authenticator, BrowserLauncher, SystemBrowser};
pub use credential_store::{CredentialKey, CredentialStore, KeyringStore, TokenKind, KEYRING_SERVICE};
pub use error::AuthError;
pub use provider::TokenProvider;
pub use service::{ServiceDescriptor, ServiceRegistry, DEFAULT_CALLBACK_URL};
pub use token_data::{BearerToken, DISABLED_TOKEN};
