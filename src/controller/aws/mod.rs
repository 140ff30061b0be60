//! # AWS Credential Loader
//!
//! Materializes AWS credentials from a referenced opaque secret in the
//! resource's namespace.
//!
//! Credentials are never exported into the controller's own process
//! environment: they travel exclusively in the per-command environment
//! overlay handed to the process runner and hook executor, and the struct
//! clears its fields on drop. That is what makes the scrub contract hold on
//! every exit path, panics included.

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use thiserror::Error;
use tracing::debug;

use crate::config::ControllerConfig;

/// Structured credential loading failure, distinguishing "secret missing"
/// from "secret malformed".
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("Credentials secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },
    #[error("Credentials secret {name} is missing required key {key}")]
    MissingKey { name: String, key: String },
    #[error("Credentials secret {name} key {key} is not valid UTF-8")]
    InvalidValue { name: String, key: String },
    #[error("Failed to read credentials secret: {0}")]
    Kube(#[from] kube::Error),
}

/// AWS credentials read from an opaque secret.
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    /// Environment overlay for an AWS-facing command: the credential
    /// variables plus the region and account variables the CDK toolchain
    /// expects.
    pub fn env(&self, region: &str, config: &ControllerConfig) -> Vec<(String, String)> {
        let mut env = vec![
            ("AWS_ACCESS_KEY_ID".to_string(), self.access_key_id.clone()),
            (
                "AWS_SECRET_ACCESS_KEY".to_string(),
                self.secret_access_key.clone(),
            ),
            ("AWS_REGION".to_string(), region.to_string()),
            ("AWS_DEFAULT_REGION".to_string(), region.to_string()),
            ("CDK_DEFAULT_REGION".to_string(), region.to_string()),
        ];
        if let Some(token) = &self.session_token {
            env.push(("AWS_SESSION_TOKEN".to_string(), token.clone()));
        }
        if let Some(account) = &config.cdk_default_account {
            // CDK reads CDK_DEFAULT_ACCOUNT; some app code reads the others.
            env.push(("CDK_DEFAULT_ACCOUNT".to_string(), account.clone()));
            env.push(("AWS_ACCOUNT_ID".to_string(), account.clone()));
            env.push(("AWS_ACCOUNT".to_string(), account.clone()));
        }
        if let Some(node_options) = &config.node_options {
            env.push(("NODE_OPTIONS".to_string(), node_options.clone()));
        }
        env
    }
}

impl Drop for AwsCredentials {
    fn drop(&mut self) {
        self.access_key_id.clear();
        self.secret_access_key.clear();
        if let Some(token) = &mut self.session_token {
            token.clear();
        }
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secret material, even at trace level.
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &"<redacted>")
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Read the named opaque secret and build credentials from it.
pub async fn load_credentials(
    client: &Client,
    namespace: &str,
    secret_name: &str,
) -> Result<AwsCredentials, CredentialsError> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = match api.get(secret_name).await {
        Ok(secret) => secret,
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            return Err(CredentialsError::SecretNotFound {
                namespace: namespace.to_string(),
                name: secret_name.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let access_key_id = secret_string(&secret, secret_name, "AWS_ACCESS_KEY_ID")?;
    let secret_access_key = secret_string(&secret, secret_name, "AWS_SECRET_ACCESS_KEY")?;
    let session_token = secret_string(&secret, secret_name, "AWS_SESSION_TOKEN").ok();

    debug!(
        "Loaded AWS credentials from secret {}/{}",
        namespace, secret_name
    );

    Ok(AwsCredentials {
        access_key_id,
        secret_access_key,
        session_token,
    })
}

/// Read the SSH private key from a `kubernetes.io/ssh-auth` secret.
pub async fn load_ssh_key(
    client: &Client,
    namespace: &str,
    secret_name: &str,
) -> Result<String, CredentialsError> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = match api.get(secret_name).await {
        Ok(secret) => secret,
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            return Err(CredentialsError::SecretNotFound {
                namespace: namespace.to_string(),
                name: secret_name.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    secret_string(&secret, secret_name, "ssh-privatekey")
}

fn secret_string(
    secret: &Secret,
    secret_name: &str,
    key: &str,
) -> Result<String, CredentialsError> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(|| CredentialsError::MissingKey {
            name: secret_name.to_string(),
            key: key.to_string(),
        })?;
    String::from_utf8(bytes.0.clone())
        .map(|s| s.trim_end_matches('\n').to_string())
        .map_err(|_| CredentialsError::InvalidValue {
            name: secret_name.to_string(),
            key: key.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret_with(keys: &[(&str, &str)]) -> Secret {
        let mut data = BTreeMap::new();
        for (k, v) in keys {
            data.insert(k.to_string(), ByteString(v.as_bytes().to_vec()));
        }
        Secret {
            data: Some(data),
            ..Default::default()
        }
    }

    fn credentials_from(secret: &Secret) -> Result<AwsCredentials, CredentialsError> {
        Ok(AwsCredentials {
            access_key_id: secret_string(secret, "creds", "AWS_ACCESS_KEY_ID")?,
            secret_access_key: secret_string(secret, "creds", "AWS_SECRET_ACCESS_KEY")?,
            session_token: secret_string(secret, "creds", "AWS_SESSION_TOKEN").ok(),
        })
    }

    #[test]
    fn test_missing_access_key_is_malformed_not_missing() {
        let secret = secret_with(&[("AWS_SECRET_ACCESS_KEY", "shh")]);
        let err = credentials_from(&secret).unwrap_err();
        assert!(matches!(err, CredentialsError::MissingKey { ref key, .. } if key == "AWS_ACCESS_KEY_ID"));
    }

    #[test]
    fn test_session_token_is_optional() {
        let secret = secret_with(&[
            ("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", "shh"),
        ]);
        let creds = credentials_from(&secret).unwrap();
        assert!(creds.session_token.is_none());
        let env = creds.env("us-east-1", &ControllerConfig::default());
        assert!(!env.iter().any(|(k, _)| k == "AWS_SESSION_TOKEN"));
    }

    #[test]
    fn test_env_overlay_contains_region_mirrors() {
        let secret = secret_with(&[
            ("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", "shh"),
            ("AWS_SESSION_TOKEN", "tok"),
        ]);
        let creds = credentials_from(&secret).unwrap();
        let mut config = ControllerConfig::default();
        config.cdk_default_account = Some("123456789012".to_string());
        let env = creds.env("eu-west-1", &config);

        let get = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("AWS_ACCESS_KEY_ID"), Some("AKIAEXAMPLE"));
        assert_eq!(get("AWS_REGION"), Some("eu-west-1"));
        assert_eq!(get("AWS_DEFAULT_REGION"), Some("eu-west-1"));
        assert_eq!(get("CDK_DEFAULT_REGION"), Some("eu-west-1"));
        assert_eq!(get("CDK_DEFAULT_ACCOUNT"), Some("123456789012"));
        assert_eq!(get("AWS_ACCOUNT_ID"), Some("123456789012"));
        assert_eq!(get("AWS_SESSION_TOKEN"), Some("tok"));
    }

    #[test]
    fn test_credentials_never_touch_process_environment() {
        let secret = secret_with(&[
            ("AWS_ACCESS_KEY_ID", "AKIAENVCHECK"),
            ("AWS_SECRET_ACCESS_KEY", "shh"),
        ]);
        let creds = credentials_from(&secret).unwrap();
        let _ = creds.env("us-east-1", &ControllerConfig::default());
        drop(creds);
        assert!(std::env::var("AWS_ACCESS_KEY_ID")
            .map(|v| v != "AKIAENVCHECK")
            .unwrap_or(true));
    }

    #[test]
    fn test_trailing_newline_stripped() {
        let secret = secret_with(&[
            ("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE\n"),
            ("AWS_SECRET_ACCESS_KEY", "shh\n"),
        ]);
        let creds = credentials_from(&secret).unwrap();
        let env = creds.env("us-east-1", &ControllerConfig::default());
        let key = env
            .iter()
            .find(|(k, _)| k == "AWS_ACCESS_KEY_ID")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(key, "AKIAEXAMPLE");
    }
}
