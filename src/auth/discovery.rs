use reqwest::blocking::Client;
use serde::Deserialize;

use crate::auth::error::AuthError;

const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// The parts of the provider metadata document the login flow needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    #[serde(default)]
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

pub fn discover(http: &Client, issuer: &str) -> Result<ProviderMetadata, AuthError> {
    let issuer_base = issuer.trim_end_matches('/');
    let url = format!("{}{}", issuer_base, WELL_KNOWN_PATH);

    let fail = |reason: String| AuthError::Discovery {
        issuer: issuer.to_string(),
        reason,
    };

    log::debug!("Fetching provider metadata from {}", url);
    let response = http.get(&url).send().map_err(|e| fail(e.to_string()))?;

    if !response.status().is_success() {
        return Err(fail(format!("{} returned {}", url, response.status())));
    }

    let metadata: ProviderMetadata = response
        .json()
        .map_err(|e| fail(format!("invalid metadata document: {e}")))?;

    if let Some(advertised) = &metadata.issuer {
        if advertised.trim_end_matches('/') != issuer_base {
            return Err(fail(format!("metadata is for issuer {advertised}")));
        }
    }

    if metadata.authorization_endpoint.is_empty() || metadata.token_endpoint.is_empty() {
        return Err(fail("metadata is missing endpoints".to_string()));
    }

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{http_client, FakeIssuer};

    #[test]
    fn test_discover_endpoints() {
        let issuer = FakeIssuer::start();

        let metadata = discover(&http_client(), &format!("{}/", issuer.url())).unwrap();
        assert_eq!(metadata.authorization_endpoint, format!("{}/authorize", issuer.url()));
        assert_eq!(metadata.token_endpoint, format!("{}/oauth/token", issuer.url()));
    }

    #[test]
    fn test_discover_rejects_foreign_issuer() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", WELL_KNOWN_PATH)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "issuer": "https://someone-else.example.com",
                    "authorization_endpoint": "https://someone-else.example.com/authorize",
                    "token_endpoint": "https://someone-else.example.com/token",
                })
                .to_string(),
            )
            .create();

        let result = discover(&http_client(), &server.url());
        assert!(matches!(result, Err(AuthError::Discovery { .. })));
    }

    #[test]
    fn test_discover_http_error() {
        let mut server = mockito::Server::new();
        let _m = server.mock("GET", WELL_KNOWN_PATH).with_status(503).create();

        let err = discover(&http_client(), &server.url()).unwrap_err();
        assert!(matches!(err, AuthError::Discovery { .. }));
        assert!(err.to_string().contains("503"));
    }
}
