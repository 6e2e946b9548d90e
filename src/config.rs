use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::auth::oauth_server::SHUTDOWN_GRACE;
use crate::auth::{AuthOptions, ServiceDescriptor, ServiceRegistry, DEFAULT_CALLBACK_URL, KEYRING_SERVICE};

pub const CONFIG_ENV_VAR: &str = "FLEETCTL_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no configuration file found (looked for {})", display_paths(.0))]
    NotFound(Vec<PathBuf>),
    #[error("failed to read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("{service} API config: {reason}")]
    Invalid { service: String, reason: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub auth: AuthSection,
    pub services: BTreeMap<String, ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub open_browser: bool,
    /// Give up waiting for the browser redirect after this long. Unset waits forever.
    pub login_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: u64,
    pub keyring_service: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            open_browser: true,
            login_timeout_secs: None,
            shutdown_grace_secs: SHUTDOWN_GRACE.as_secs(),
            keyring_service: KEYRING_SERVICE.to_string(),
        }
    }
}

impl AuthSection {
    pub fn options(&self) -> AuthOptions {
        AuthOptions {
            open_browser: self.open_browser,
            login_timeout: self.login_timeout_secs.map(Duration::from_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

/// One `[services.<tag>]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub issuer_endpoint: String,
    #[serde(default)]
    pub audience_endpoint: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_callback_url")]
    pub pkce_callback_url: String,
    #[serde(default)]
    pub disable: bool,
}

fn default_scopes() -> Vec<String> {
    vec!["offline_access".to_string(), "read".to_string()]
}

fn default_callback_url() -> String {
    DEFAULT_CALLBACK_URL.to_string()
}

impl Config {
    /// Loads the config from `path`, or from the first default location that exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => find_config_file()?,
        };

        log::debug!("Loading configuration from {}", path.display());
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        Self::from_toml_str(&contents, &path.display().to_string())
    }

    pub fn from_toml_str(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    /// Validates every service and builds the registry handed to the auth core.
    pub fn registry(&self) -> Result<ServiceRegistry, ConfigError> {
        let mut descriptors = Vec::with_capacity(self.services.len());
        for (tag, service) in &self.services {
            service.validate(tag)?;
            descriptors.push(service.descriptor(tag));
        }
        Ok(ServiceRegistry::new(descriptors))
    }
}

impl ServiceConfig {
    fn validate(&self, tag: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            service: tag.to_string(),
            reason,
        };

        if self.endpoint.is_empty() {
            return Err(invalid("endpoint not defined".into()));
        }
        Url::parse(&self.endpoint).map_err(|e| invalid(format!("endpoint URL error: {e}")))?;

        if self.disable {
            return Ok(());
        }

        if self.issuer_endpoint.is_empty() {
            return Err(invalid("Issuer endpoint not defined".into()));
        }
        if self.audience_endpoint.is_empty() {
            return Err(invalid("Audience endpoint not defined".into()));
        }

        let callback = Url::parse(&self.pkce_callback_url)
            .map_err(|e| invalid(format!("callback URL error: {e}")))?;
        if callback.host_str().is_none() {
            return Err(invalid("callback URL has no host".into()));
        }

        Ok(())
    }

    fn descriptor(&self, tag: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            service_tag: tag.to_string(),
            endpoint: self.endpoint.clone(),
            client_id: self.client_id.clone(),
            issuer_endpoint: self.issuer_endpoint.clone(),
            audience_endpoint: self.audience_endpoint.clone(),
            scopes: self.scopes.clone(),
            redirect_url: self.pkce_callback_url.clone(),
            disabled: self.disable,
        }
    }
}

fn find_config_file() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    let mut candidates = Vec::new();
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".fleetctl.toml"));
    }
    if let Some(config_dir) = dirs::config_dir() {
        candidates.push(config_dir.join("fleetctl").join("config.toml"));
    }

    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or(ConfigError::NotFound(candidates))
}
