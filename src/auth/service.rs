use std::collections::BTreeMap;

use crate::auth::error::AuthError;

pub const DEFAULT_CALLBACK_URL: &str = "http://localhost:18000/identity/callback";

/// OAuth client settings for one backend API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service_tag: String,
    /// Base URL of the backend REST API.
    pub endpoint: String,
    pub client_id: String,
    pub issuer_endpoint: String,
    pub audience_endpoint: String,
    pub scopes: Vec<String>,
    pub redirect_url: String,
    pub disabled: bool,
}

/// Every configured backend, keyed by service tag. Built once per process.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceDescriptor>,
}

impl ServiceRegistry {
    pub fn new(descriptors: impl IntoIterator<Item = ServiceDescriptor>) -> Self {
        Self {
            services: descriptors
                .into_iter()
                .map(|d| (d.service_tag.clone(), d))
                .collect(),
        }
    }

    pub fn get(&self, service_tag: &str) -> Result<&ServiceDescriptor, AuthError> {
        self.services.get(service_tag).ok_or_else(|| {
            AuthError::Config(format!("no configuration for service {service_tag:?}"))
        })
    }
}
