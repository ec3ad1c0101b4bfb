//! Credential lookup for handlers that call authenticated services.
//!
//! Acquiring and refreshing tokens happens outside the engine. Handlers only
//! ask a [`CredentialProvider`] for the current bundle of a user/service pair.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Tokens for one user on one service.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Service-specific extras (API base URL, workspace ID, ...)
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl CredentialBundle {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            extra: HashMap::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| at <= Utc::now()).unwrap_or(false)
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("extra", &self.extra)
            .finish()
    }
}

/// Source of credentials, refreshed transparently by the implementation.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credentials(&self, user_id: &str, service_type: &str)
        -> Result<CredentialBundle>;
}

/// In-memory provider keyed by `(user_id, service_type)`.
#[derive(Debug, Default)]
pub struct StaticCredentialProvider {
    credentials: RwLock<HashMap<(String, String), CredentialBundle>>,
}

/// Credentials file layout: user ID -> service type -> bundle.
type CredentialsFile = HashMap<String, HashMap<String, CredentialBundle>>;

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default credentials file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("nodeflow").join("credentials.json"))
    }

    /// Load bundles from a JSON file of the form
    /// `{ "<user>": { "<service>": { "access_token": "..." } } }`.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Credential(format!(
                "Failed to read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        let file: CredentialsFile = serde_json::from_str(&content).map_err(|e| {
            Error::Credential(format!(
                "Invalid credentials file {}: {}",
                path.display(),
                e
            ))
        })?;

        let credentials = file
            .into_iter()
            .flat_map(|(user_id, services)| {
                services
                    .into_iter()
                    .map(move |(service, bundle)| ((user_id.clone(), service), bundle))
            })
            .collect();

        Ok(Self {
            credentials: RwLock::new(credentials),
        })
    }

    pub async fn insert(&self, user_id: &str, service_type: &str, bundle: CredentialBundle) {
        self.credentials
            .write()
            .await
            .insert((user_id.to_string(), service_type.to_string()), bundle);
    }

    pub async fn remove(&self, user_id: &str, service_type: &str) -> bool {
        self.credentials
            .write()
            .await
            .remove(&(user_id.to_string(), service_type.to_string()))
            .is_some()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_credentials(
        &self,
        user_id: &str,
        service_type: &str,
    ) -> Result<CredentialBundle> {
        let credentials = self.credentials.read().await;
        let bundle = credentials
            .get(&(user_id.to_string(), service_type.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::Credential(format!(
                    "No credentials for service '{}' (user '{}')",
                    service_type, user_id
                ))
            })?;

        if bundle.is_expired() {
            return Err(Error::Credential(format!(
                "Credentials for service '{}' have expired",
                service_type
            )));
        }

        Ok(bundle)
    }
}
