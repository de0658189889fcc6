use crate::error::CredentialError;
use std::fmt;
use zeroize::Zeroizing;

/// Sign-in identity and secret. The secret is wiped from memory on drop.
#[derive(Clone)]
pub struct Credentials {
    pub identity: String,
    pub secret: Zeroizing<String>,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: Zeroizing::new(secret.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Supplies credentials for a marketplace service.
///
/// Consulted at most once per search attempt; the result is dropped when the attempt ends.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Credentials for `service`.
    async fn get_credentials(&self, service: &str) -> Result<Credentials, CredentialError>;
}

/// Reads credentials from two environment variables.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    identity_var: String,
    secret_var: String,
}

impl EnvCredentialProvider {
    pub fn new(identity_var: impl Into<String>, secret_var: impl Into<String>) -> Self {
        Self {
            identity_var: identity_var.into(),
            secret_var: secret_var.into(),
        }
    }

    fn lookup<F>(&self, service: &str, get: F) -> Result<Credentials, CredentialError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let unavailable = || CredentialError::Unavailable {
            service: service.to_string(),
        };

        let identity = get(&self.identity_var)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(unavailable)?;
        let secret = Zeroizing::new(
            get(&self.secret_var)
                .filter(|v| !v.is_empty())
                .ok_or_else(unavailable)?,
        );

        Ok(Credentials {
            identity: identity.trim().to_string(),
            secret,
        })
    }
}

#[async_trait::async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn get_credentials(&self, service: &str) -> Result<Credentials, CredentialError> {
        self.lookup(service, |name| std::env::var(name).ok())
    }
}
