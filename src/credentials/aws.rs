//! Credentials held in AWS Secrets Manager.

use super::{parse_secret, CredentialSource};
use crate::error::IngestError;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_secretsmanager::config::{Credentials, Region};
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use aws_sdk_secretsmanager::Client;
use std::collections::HashMap;
use tracing::{debug, error};

/// Reads secrets from AWS Secrets Manager.
///
/// Without static keys the default AWS credential chain is used (environment,
/// profile, then instance or task role).
#[derive(Clone, Debug)]
pub struct SecretsManagerSource {
    client: Client,
}

impl SecretsManagerSource {
    pub async fn connect(
        region: &str,
        endpoint: Option<&str>,
        access_key_id: Option<&str>,
        secret_access_key: Option<&str>,
    ) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key_id,
                secret,
                None,
                None,
                "snapshot-config",
            ));
        }

        let sdk_config = loader.load().await;
        Self::from_client(Client::new(&sdk_config))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialSource for SecretsManagerSource {
    async fn get_credentials(
        &self,
        secret_name: &str,
    ) -> Result<HashMap<String, String>, IngestError> {
        debug!(secret = %secret_name, "Loading secret from Secrets Manager");

        let output = self
            .client
            .get_secret_value()
            .secret_id(secret_name)
            .send()
            .await
            .map_err(|e| {
                error!(
                    secret = %secret_name,
                    error = %DisplayErrorContext(&e),
                    "Error retrieving secret"
                );
                IngestError::storage(format!("failed to retrieve secret {}", secret_name), e)
            })?;

        output
            .secret_string()
            .ok_or_else(|| anyhow!("Secret {} has no string value", secret_name))
            .and_then(|payload| {
                parse_secret(payload).with_context(|| format!("Secret {} is malformed", secret_name))
            })
            .map_err(|e| {
                error!(secret = %secret_name, error = %format!("{:#}", e), "Error parsing secret");
                IngestError::storage(format!("failed to retrieve secret {}", secret_name), e)
            })
    }
}
