//! OAuth2 Authorization Code + PKCE login and token caching for the fleet
//! management CLI.
//!
//! Every backend REST client gets its bearer token from
//! [`TokenProvider::access_token`](auth::TokenProvider::access_token), which
//! returns a cached token, refreshes it, or runs the browser login as needed.

pub mod auth;
pub mod config;
