//! Token provider facade.
//!
//! `access_token` is the only call the rest of the CLI makes. It tries the
//! cached token, then a silent refresh, then the interactive login, in that
//! order, and never retries beyond that.

use chrono::Utc;

use crate::auth::authenticator::{Authenticator, BrowserLauncher, SystemBrowser};
use crate::auth::credential_store::{load_token_pair, store_token, CredentialStore, KeyringStore};
use crate::auth::discovery::discover;
use crate::auth::error::AuthError;
use crate::auth::service::ServiceDescriptor;
use crate::auth::token_client::TokenClient;
use crate::auth::token_data::{BearerToken, DISABLED_TOKEN};

/// Result of the non-interactive half of `access_token`.
enum CachedToken {
    Usable(BearerToken),
    Missing,
    RefreshFailed(AuthError),
}

pub struct TokenProvider<S = KeyringStore, B = SystemBrowser> {
    authenticator: Authenticator<S, B>,
}

impl<S, B> TokenProvider<S, B>
where
    S: CredentialStore,
    B: BrowserLauncher,
{
    pub fn new(authenticator: Authenticator<S, B>) -> Self {
        Self { authenticator }
    }

    pub fn authenticator(&self) -> &Authenticator<S, B> {
        &self.authenticator
    }

    /// Returns a bearer token for `service_tag`.
    ///
    /// With `force_reauth` the cached tokens are ignored and the interactive
    /// login runs straight away. Refresh failures are never returned, they
    /// only trigger the interactive fallback.
    pub fn access_token(&self, service_tag: &str, force_reauth: bool) -> Result<String, AuthError> {
        let service = self.authenticator.services().get(service_tag)?;
        if service.disabled {
            return Ok(DISABLED_TOKEN.to_string());
        }

        if force_reauth {
            log::debug!("Re-authentication forced for {}", service_tag);
            return self
                .authenticator
                .authenticate(service_tag)
                .map(|token| token.access_token);
        }

        match self.cached_token(service)? {
            CachedToken::Usable(token) => return Ok(token.access_token),
            CachedToken::Missing => {
                log::info!("No cached tokens for {}, starting login", service_tag);
            }
            CachedToken::RefreshFailed(e) => {
                log::warn!("{}; falling back to interactive login for {}", e, service_tag);
            }
        }

        self.authenticator
            .authenticate(service_tag)
            .map(|token| token.access_token)
    }

    /// Store errors are returned as-is, anything that goes wrong talking to
    /// the issuer becomes `RefreshFailed`.
    fn cached_token(&self, service: &ServiceDescriptor) -> Result<CachedToken, AuthError> {
        let store = self.authenticator.store();
        let Some((access, refresh)) =
            load_token_pair(store, &service.client_id, &service.service_tag)?
        else {
            return Ok(CachedToken::Missing);
        };

        let cached = BearerToken::from_raw(&access, &refresh).unwrap_or_else(|e| {
            log::debug!("Cached access token has no readable expiry: {}", e);
            BearerToken {
                access_token: access,
                refresh_token: refresh,
                expiry: None,
            }
        });

        if !cached.needs_refresh(Utc::now()) {
            return Ok(CachedToken::Usable(cached));
        }

        let refreshed = match self.refresh(service, &cached) {
            Ok(token) => token,
            Err(e) => return Ok(CachedToken::RefreshFailed(e)),
        };

        if refreshed.access_token != cached.access_token {
            store_token(store, &service.client_id, &service.service_tag, &refreshed)?;
        }

        log::debug!("Refreshed access token for {}", service.service_tag);
        Ok(CachedToken::Usable(refreshed))
    }

    fn refresh(&self, service: &ServiceDescriptor, cached: &BearerToken) -> Result<BearerToken, AuthError> {
        let http = self.authenticator.http();
        let metadata = discover(http, &service.issuer_endpoint)
            .map_err(|e| AuthError::Refresh(e.to_string()))?;

        TokenClient::new(http.clone(), &metadata.token_endpoint, &service.client_id)
            .refresh(&cached.refresh_token)
    }
}
