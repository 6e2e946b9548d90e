//! Interactive Authorization Code + PKCE login.
//!
//! The flow for one service:
//!
//! 1. resolve the issuer's endpoints through discovery
//! 2. generate a fresh verifier, challenge and state
//! 3. bind the callback listener, then build the authorization URL
//! 4. open the URL in the browser and wait for the redirect
//! 5. store the exchanged tokens in the credential store
//!
//! The listener is torn down on every path out of `authenticate`.

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use url::Url;

use crate::auth::credential_store::{store_token, CredentialStore};
use crate::auth::discovery::discover;
use crate::auth::error::AuthError;
use crate::auth::oauth_server::{CallbackListener, SHUTDOWN_GRACE};
use crate::auth::pkce::{generate_pkce, PkceMaterial};
use crate::auth::service::{ServiceDescriptor, ServiceRegistry};
use crate::auth::token_client::TokenClient;
use crate::auth::token_data::BearerToken;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens the authorization URL for the user.
pub trait BrowserLauncher {
    fn open(&self, url: &str) -> io::Result<()>;
}

/// Uses the platform's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        webbrowser::open(url)
    }
}

#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub open_browser: bool,
    /// `None` waits for the user indefinitely.
    pub login_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            open_browser: true,
            login_timeout: None,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}

pub struct Authenticator<S, B = SystemBrowser> {
    services: ServiceRegistry,
    store: S,
    browser: B,
    http: Client,
    options: AuthOptions,
    cancel: Option<Arc<AtomicBool>>,
}

impl<S, B> Authenticator<S, B>
where
    S: CredentialStore,
    B: BrowserLauncher,
{
    pub fn new(services: ServiceRegistry, store: S, browser: B, options: AuthOptions) -> Self {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            services,
            store,
            browser,
            http,
            options,
            cancel: None,
        }
    }

    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    /// Setting the flag aborts a pending wait for the browser redirect.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Runs the interactive login for `service_tag` and caches the result.
    pub fn authenticate(&self, service_tag: &str) -> Result<BearerToken, AuthError> {
        let service = self.services.get(service_tag)?;
        if service.disabled {
            return Ok(BearerToken::disabled());
        }

        let token = self.login(service)?;
        store_token(&self.store, &service.client_id, &service.service_tag, &token)?;

        log::info!("Authenticated with service {}", service.service_tag);
        Ok(token)
    }

    fn login(&self, service: &ServiceDescriptor) -> Result<BearerToken, AuthError> {
        let metadata = discover(&self.http, &service.issuer_endpoint)?;
        let pkce = generate_pkce();

        let redirect_url = Url::parse(&service.redirect_url).map_err(|e| {
            AuthError::Config(format!(
                "invalid callback URL {} for {}: {}",
                service.redirect_url, service.service_tag, e
            ))
        })?;

        let client = TokenClient::new(self.http.clone(), &metadata.token_endpoint, &service.client_id);
        let verifier = pkce.verifier.clone();
        let redirect_uri = service.redirect_url.clone();

        // Listen before the URL exists so the redirect can't beat us
        let listener = CallbackListener::start(&redirect_url, pkce.state.clone(), move |code: &str| {
            client.exchange_code(code, &verifier, &redirect_uri)
        })?;

        let auth_url = authorization_url(&metadata.authorization_endpoint, service, &pkce)?;

        eprintln!(
            "Authenticating with {}. If your browser does not open, visit:\n\n{}\n",
            service.service_tag, auth_url
        );
        if self.options.open_browser {
            if let Err(e) = self.browser.open(&auth_url) {
                log::warn!("Failed to open browser: {}", e);
            }
        }

        let outcome = listener.wait(self.options.login_timeout, self.cancel.as_deref());
        listener.shutdown(self.options.shutdown_grace);
        outcome
    }
}

pub(crate) fn authorization_url(
    authorization_endpoint: &str,
    service: &ServiceDescriptor,
    pkce: &PkceMaterial,
) -> Result<String, AuthError> {
    let mut auth_url = Url::parse(authorization_endpoint).map_err(|e| AuthError::Discovery {
        issuer: service.issuer_endpoint.clone(),
        reason: format!("invalid authorization endpoint {authorization_endpoint}: {e}"),
    })?;

    {
        let mut query = auth_url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &service.client_id)
            .append_pair("redirect_uri", &service.redirect_url)
            .append_pair("scope", &service.scopes.join(" "))
            .append_pair("state", &pkce.state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");
        if !service.audience_endpoint.is_empty() {
            query.append_pair("audience", &service.audience_endpoint);
        }
    }

    Ok(auth_url.to_string())
}
