//! Secret lookup
//!
//! Bootstrap data (Ignition configs, cloud-init user data) lives in
//! Kubernetes Secrets. The engine only needs one value at a time, so the
//! store interface is a single call.

use crate::error::ProvisionError;

/// Read access to secret data
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// Value of `key` in secret `namespace/name`.
    ///
    /// `Ok(None)` means the secret exists but has no such key.
    async fn get_secret_data(&self, namespace: &str, name: &str, key: &str) -> Result<Option<Vec<u8>>, ProvisionError>;
}

/// Fetch `userData` from a secret with the error messages bootstrap callers report
pub(crate) async fn user_data(
    store: &dyn SecretStore,
    namespace: &str,
    name: &str,
) -> Result<Vec<u8>, ProvisionError> {
    match store.get_secret_data(namespace, name, "userData").await {
        Ok(Some(data)) => Ok(data),
        Ok(None) => Err(ProvisionError::Secret(format!(
            "can not retrieve user data secret '{namespace}/{name}' when constructing cloud init volume: key 'userData' not found in the secret"
        ))),
        Err(e) => Err(ProvisionError::Secret(format!(
            "can not retrieve user data secret '{namespace}/{name}' when constructing cloud init volume: {e}"
        ))),
    }
}

/// In-memory secret store for tests
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    secrets: std::sync::Arc<
        std::sync::Mutex<std::collections::HashMap<(String, String), std::collections::HashMap<String, Vec<u8>>>>,
    >,
}

#[cfg(any(test, feature = "test-util"))]
impl MemorySecretStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `key = value` in secret `namespace/name`
    pub fn insert(&self, namespace: &str, name: &str, key: &str, value: impl Into<Vec<u8>>) {
        self.secrets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .insert(key.to_string(), value.into());
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait::async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret_data(&self, namespace: &str, name: &str, key: &str) -> Result<Option<Vec<u8>>, ProvisionError> {
        let secrets = self.secrets.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let secret = secrets
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ProvisionError::Secret(format!("secrets \"{name}\" not found")))?;
        Ok(secret.get(key).cloned())
    }
}
