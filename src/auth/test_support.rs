//! Fakes shared by the unit tests: an in-memory credential store, a browser
//! that performs the redirect itself, and an issuer served by mockito.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use base64::Engine;
use mockito::{Matcher, Mock, ServerGuard};
use reqwest::blocking::Client;
use url::Url;

use crate::auth::authenticator::BrowserLauncher;
use crate::auth::credential_store::{CredentialKey, CredentialStore};
use crate::auth::error::AuthError;
use crate::auth::service::ServiceDescriptor;

pub(crate) fn http_client() -> Client {
    Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

pub(crate) fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub(crate) fn descriptor(service_tag: &str, issuer: &str) -> ServiceDescriptor {
    descriptor_with_port(service_tag, issuer, 18000)
}

pub(crate) fn descriptor_with_port(service_tag: &str, issuer: &str, port: u16) -> ServiceDescriptor {
    ServiceDescriptor {
        service_tag: service_tag.to_string(),
        endpoint: format!("https://{service_tag}.example.com"),
        client_id: "cli".to_string(),
        issuer_endpoint: issuer.to_string(),
        audience_endpoint: "https://api.example.com".to_string(),
        scopes: vec!["offline_access".to_string(), "read".to_string()],
        redirect_url: format!("http://127.0.0.1:{port}/identity/callback"),
        disabled: false,
    }
}

pub(crate) fn jwt_with_claims(claims: serde_json::Value) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = serde_json::json!({"alg": "RS256", "typ": "JWT"});
    format!(
        "{}.{}.{}",
        engine.encode(serde_json::to_vec(&header).unwrap()),
        engine.encode(serde_json::to_vec(&claims).unwrap()),
        engine.encode(b"sig")
    )
}

/// A JWT whose `exp` is `secs` from now (negative for already expired).
pub(crate) fn jwt_expiring_in(secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + secs;
    jwt_with_claims(serde_json::json!({"sub": "user", "exp": exp, "jti": rand_suffix()}))
}

fn rand_suffix() -> u64 {
    use rand::Rng;
    rand::thread_rng().gen()
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, String>,
    gets: usize,
    sets: HashMap<String, usize>,
    failing_sets: HashSet<String>,
    fail_gets: bool,
}

/// Call-counting in-memory store. Clones share state.
#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// Seeds an entry without counting it as a `set`.
    pub(crate) fn insert(&self, key: &CredentialKey, value: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.insert(key.entry_name(), value.to_string());
    }

    pub(crate) fn value(&self, key: &CredentialKey) -> Option<String> {
        self.inner.lock().unwrap().entries.get(&key.entry_name()).cloned()
    }

    pub(crate) fn sets_for(&self, key: &CredentialKey) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.sets.get(&key.entry_name()).copied().unwrap_or(0)
    }

    pub(crate) fn total_sets(&self) -> usize {
        self.inner.lock().unwrap().sets.values().sum()
    }

    pub(crate) fn total_gets(&self) -> usize {
        self.inner.lock().unwrap().gets
    }

    pub(crate) fn fail_sets_for(&self, key: &CredentialKey) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_sets.insert(key.entry_name());
    }

    pub(crate) fn fail_gets(&self) {
        self.inner.lock().unwrap().fail_gets = true;
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &CredentialKey) -> Result<Option<String>, AuthError> {
        let mut inner = self.inner.lock().unwrap();
        inner.gets += 1;
        if inner.fail_gets {
            return Err(AuthError::Store("keyring locked".into()));
        }
        Ok(inner.entries.get(&key.entry_name()).cloned())
    }

    fn set(&self, key: &CredentialKey, value: &str) -> Result<(), AuthError> {
        let name = key.entry_name();
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_sets.contains(&name) {
            return Err(AuthError::Store(format!("cannot write {name}")));
        }
        *inner.sets.entry(name.clone()).or_default() += 1;
        inner.entries.insert(name, value.to_string());
        Ok(())
    }

    fn delete(&self, key: &CredentialKey) -> Result<(), AuthError> {
        self.inner.lock().unwrap().entries.remove(&key.entry_name());
        Ok(())
    }
}

/// Plays the user: on `open` it follows the authorization URL straight back
/// to the callback listener with `code` and the state it was given.
#[derive(Clone)]
pub(crate) struct RedirectingBrowser {
    code: String,
    forge_state: bool,
    fail_open: bool,
    opens: Arc<AtomicUsize>,
}

impl RedirectingBrowser {
    pub(crate) fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            forge_state: false,
            fail_open: false,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_forged_state(mut self) -> Self {
        self.forge_state = true;
        self
    }

    /// Still redirects, as if the user pasted the printed URL, but reports failure.
    pub(crate) fn failing_to_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl BrowserLauncher for RedirectingBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let auth_url = Url::parse(url).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let params: HashMap<String, String> = auth_url.query_pairs().into_owned().collect();

        let state = if self.forge_state {
            "forged-state".to_string()
        } else {
            params["state"].clone()
        };
        let mut callback = Url::parse(&params["redirect_uri"])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        callback
            .query_pairs_mut()
            .append_pair("code", &self.code)
            .append_pair("state", &state);

        thread::spawn(move || {
            let _ = http_client().get(callback).send();
        });

        if self.fail_open {
            return Err(io::Error::new(io::ErrorKind::Other, "no display"));
        }
        Ok(())
    }
}

/// An OIDC issuer with a discovery document, backed by a mockito server.
pub(crate) struct FakeIssuer {
    server: ServerGuard,
    _discovery: Mock,
}

impl FakeIssuer {
    pub(crate) fn start() -> Self {
        let mut server = mockito::Server::new();
        let url = server.url();
        let discovery = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "issuer": url,
                    "authorization_endpoint": format!("{url}/authorize"),
                    "token_endpoint": format!("{url}/oauth/token"),
                })
                .to_string(),
            )
            .create();

        Self {
            server,
            _discovery: discovery,
        }
    }

    pub(crate) fn url(&self) -> String {
        self.server.url()
    }

    pub(crate) fn token_endpoint(&self) -> String {
        format!("{}/oauth/token", self.server.url())
    }

    pub(crate) fn expect_code_exchange(
        &mut self,
        code: &str,
        verifier: &str,
        access: &str,
        refresh: &str,
    ) -> Mock {
        self.server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), code.into()),
                Matcher::UrlEncoded("code_verifier".into(), verifier.into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(token_body(access, Some(refresh)))
            .expect(1)
            .create()
    }

    pub(crate) fn expect_any_code_exchange(&mut self, access: &str, refresh: &str, times: usize) -> Mock {
        self.server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "authorization_code".into(),
            ))
            .with_header("content-type", "application/json")
            .with_body(token_body(access, Some(refresh)))
            .expect(times)
            .create()
    }

    pub(crate) fn expect_refresh(
        &mut self,
        refresh_token: &str,
        new_access: &str,
        new_refresh: Option<&str>,
        times: usize,
    ) -> Mock {
        self.server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), refresh_token.into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(token_body(new_access, new_refresh))
            .expect(times)
            .create()
    }

    pub(crate) fn reject_refresh(&mut self, times: usize) -> Mock {
        self.server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"refresh token revoked"}"#)
            .expect(times)
            .create()
    }
}

fn token_body(access: &str, refresh: Option<&str>) -> String {
    let mut body = serde_json::json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": 3600,
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = serde_json::Value::String(refresh.to_string());
    }
    body.to_string()
}
