//! Secret store backed by the Kubernetes API

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use provisioner::{ProvisionError, SecretStore};

/// Reads bootstrap secrets with `Api<Secret>`
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    /// Store reading through `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get_secret_data(&self, namespace: &str, name: &str, key: &str) -> Result<Option<Vec<u8>>, ProvisionError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match api.get(name).await {
            Ok(secret) => secret,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Err(ProvisionError::Secret(format!("secrets \"{name}\" not found")));
            }
            Err(e) => return Err(ProvisionError::Secret(e.to_string())),
        };
        Ok(secret.data.and_then(|mut data| data.remove(key)).map(|bytes| bytes.0))
    }
}
