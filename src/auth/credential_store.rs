use crate::auth::error::AuthError;
use crate::auth::token_data::BearerToken;

pub const KEYRING_SERVICE: &str = "fleetctl";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Access,
    Refresh,
}

/// The only identifier the store understands. Two services that share a
/// client id still get separate entries because the service tag is part of it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub client_id: String,
    pub service_tag: String,
    pub kind: TokenKind,
}

impl CredentialKey {
    pub fn new(client_id: &str, service_tag: &str, kind: TokenKind) -> Self {
        Self {
            client_id: client_id.to_string(),
            service_tag: service_tag.to_string(),
            kind,
        }
    }

    pub fn access(client_id: &str, service_tag: &str) -> Self {
        Self::new(client_id, service_tag, TokenKind::Access)
    }

    pub fn refresh(client_id: &str, service_tag: &str) -> Self {
        Self::new(client_id, service_tag, TokenKind::Refresh)
    }

    /// Keyring entry name, e.g. `cli_fleetdb_token` or `cli_fleetdb_refresh_token`.
    pub fn entry_name(&self) -> String {
        match self.kind {
            TokenKind::Access => format!("{}_{}_token", self.client_id, self.service_tag),
            TokenKind::Refresh => format!("{}_{}_refresh_token", self.client_id, self.service_tag),
        }
    }
}

/// Opaque string storage. `Ok(None)` means "not stored", which is not an error.
pub trait CredentialStore {
    fn get(&self, key: &CredentialKey) -> Result<Option<String>, AuthError>;
    fn set(&self, key: &CredentialKey, value: &str) -> Result<(), AuthError>;
    /// Removing an entry that doesn't exist is not an error.
    fn delete(&self, key: &CredentialKey) -> Result<(), AuthError>;
}

/// Store backed by the platform keychain. Every call goes to the OS.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &CredentialKey) -> Result<keyring::Entry, AuthError> {
        keyring::Entry::new(&self.service, &key.entry_name())
            .map_err(|e| AuthError::Store(e.to_string()))
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: &CredentialKey) -> Result<Option<String>, AuthError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::Store(format!("{}: {e}", key.entry_name()))),
        }
    }

    fn set(&self, key: &CredentialKey, value: &str) -> Result<(), AuthError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| AuthError::Store(format!("{}: {e}", key.entry_name())))
    }

    fn delete(&self, key: &CredentialKey) -> Result<(), AuthError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::Store(format!("{}: {e}", key.entry_name()))),
        }
    }
}

/// Loads the access/refresh pair for a service. Returns `None` unless both
/// entries are present and non-empty.
pub fn load_token_pair<S: CredentialStore + ?Sized>(
    store: &S,
    client_id: &str,
    service_tag: &str,
) -> Result<Option<(String, String)>, AuthError> {
    let access = store.get(&CredentialKey::access(client_id, service_tag))?;
    let refresh = store.get(&CredentialKey::refresh(client_id, service_tag))?;

    match (access, refresh) {
        (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
            Ok(Some((access, refresh)))
        }
        _ => Ok(None),
    }
}

/// Writes both halves of a token. If either write fails, both entries are
/// put back to what they held before, deleting any that didn't exist.
pub fn store_token<S: CredentialStore + ?Sized>(
    store: &S,
    client_id: &str,
    service_tag: &str,
    token: &BearerToken,
) -> Result<(), AuthError> {
    let access_key = CredentialKey::access(client_id, service_tag);
    let refresh_key = CredentialKey::refresh(client_id, service_tag);

    let previous = [
        (&access_key, store.get(&access_key)?),
        (&refresh_key, store.get(&refresh_key)?),
    ];

    let written = store
        .set(&access_key, &token.access_token)
        .and_then(|()| store.set(&refresh_key, &token.refresh_token));

    if let Err(e) = written {
        for (key, value) in &previous {
            let restored = match value {
                Some(value) => store.set(key, value),
                None => store.delete(key),
            };
            if let Err(restore_err) = restored {
                log::error!(
                    "Failed to restore {} for {}: {}",
                    key.entry_name(),
                    service_tag,
                    restore_err
                );
            }
        }
        return Err(e);
    }

    log::debug!("Stored tokens for service {} in credential store", service_tag);
    Ok(())
}
