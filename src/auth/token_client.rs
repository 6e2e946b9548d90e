use chrono::{Duration, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::auth::error::AuthError;
use crate::auth::token_data::{decode_expiry, BearerToken};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Talks to the token endpoint resolved through discovery.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: Client,
    token_endpoint: String,
    client_id: String,
}

impl TokenClient {
    pub fn new(http: Client, token_endpoint: &str, client_id: &str) -> Self {
        Self {
            http,
            token_endpoint: token_endpoint.to_string(),
            client_id: client_id.to_string(),
        }
    }

    /// `authorization_code` grant with the PKCE verifier.
    pub fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<BearerToken, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ];

        let response = self.post_grant(&params).map_err(AuthError::Exchange)?;
        Ok(into_bearer(response, ""))
    }

    /// `refresh_token` grant. Keeps the old refresh token if the server doesn't rotate it.
    pub fn refresh(&self, refresh_token: &str) -> Result<BearerToken, AuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];

        let response = self.post_grant(&params).map_err(AuthError::Refresh)?;
        Ok(into_bearer(response, refresh_token))
    }

    fn post_grant(&self, params: &[(&str, &str)]) -> Result<TokenResponse, String> {
        let response = self
            .http
            .post(&self.token_endpoint)
            .form(params)
            .send()
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(format!("{}: {}", status, error_text));
        }

        response
            .json::<TokenResponse>()
            .map_err(|e| format!("invalid token response: {e}"))
    }
}

fn into_bearer(response: TokenResponse, previous_refresh: &str) -> BearerToken {
    let expiry = decode_expiry(&response.access_token)
        .ok()
        .flatten()
        .or_else(|| {
            response
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs))
        });

    BearerToken {
        access_token: response.access_token,
        refresh_token: response
            .refresh_token
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| previous_refresh.to_string()),
        expiry,
    }
}
