//! Azure credential chain and ARM token management.
//!
//! Tokens are cached as pre-formatted `Bearer {token}` header values behind
//! an `Arc<str>`, refreshed shortly before expiry. The credential chain
//! mirrors the classic environment-based authorizer: service principal from
//! the environment, then managed identity, then the Azure CLI.

use std::sync::Arc;

use azure_core::credentials::{AccessToken, Secret, TokenCredential};
use azure_identity::{AzureCliCredential, ClientSecretCredential, ManagedIdentityCredential};
use tokio::sync::RwLock;

use super::AzureError;

/// Scope for Azure Resource Manager tokens.
const ARM_SCOPE: &str = "https://management.azure.com/.default";

/// Buffer time before token expiry to trigger refresh (5 minutes).
const TOKEN_REFRESH_BUFFER_SECS: u64 = 300;

/// Build the credential chain used for both the management plane and the
/// blob service:
///
/// - Service principal from `AZURE_TENANT_ID` / `AZURE_CLIENT_ID` /
///   `AZURE_CLIENT_SECRET` (CI and cron jobs)
/// - Managed identity (when running in Azure)
/// - Azure CLI (local development)
pub fn build_credential() -> Result<Arc<dyn TokenCredential>, AzureError> {
    if let (Ok(tenant_id), Ok(client_id), Ok(client_secret)) = (
        std::env::var("AZURE_TENANT_ID"),
        std::env::var("AZURE_CLIENT_ID"),
        std::env::var("AZURE_CLIENT_SECRET"),
    ) {
        let credential =
            ClientSecretCredential::new(&tenant_id, client_id, Secret::new(client_secret), None)
                .map_err(|e| {
                    AzureError::Auth(format!("Failed to create client secret credential: {}", e))
                })?;
        return Ok(credential);
    }

    if let Ok(credential) = ManagedIdentityCredential::new(None) {
        return Ok(credential);
    }

    let credential = AzureCliCredential::new(None)
        .map_err(|e| AzureError::Auth(format!("Failed to create Azure CLI credential: {}", e)))?;
    Ok(credential)
}

/// A cached access token with its expiration time.
#[derive(Debug, Clone)]
struct CachedToken {
    /// Pre-formatted header value: "Bearer {token}"
    bearer_header: Arc<str>,
    /// Expiration with the refresh safety margin already applied.
    expires_at: std::time::Instant,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        std::time::Instant::now() >= self.expires_at
    }
}

enum TokenBackend {
    Credential(Arc<dyn TokenCredential>),
    /// Fixed token, used by tests to exercise the client without a credential.
    Static(Arc<str>),
}

/// Token source for Azure Resource Manager requests.
pub struct ArmTokenSource {
    backend: TokenBackend,
    cached_token: RwLock<Option<CachedToken>>,
}

impl std::fmt::Debug for ArmTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.backend {
            TokenBackend::Credential(_) => "credential",
            TokenBackend::Static(_) => "static",
        };
        f.debug_struct("ArmTokenSource").field("backend", &backend).finish()
    }
}

impl ArmTokenSource {
    pub fn new(credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            backend: TokenBackend::Credential(credential),
            cached_token: RwLock::new(None),
        }
    }

    /// A token source that always yields the given token. Never refreshes.
    pub fn from_static_token(token: &str) -> Self {
        Self {
            backend: TokenBackend::Static(format!("Bearer {}", token).into()),
            cached_token: RwLock::new(None),
        }
    }

    /// Gets a valid ARM token as a pre-formatted `Bearer {token}` header
    /// value. Safe to call concurrently; a read-write lock keeps refreshes
    /// single-flight.
    pub async fn bearer_header(&self) -> Result<Arc<str>, AzureError> {
        let credential = match &self.backend {
            TokenBackend::Static(header) => return Ok(header.clone()),
            TokenBackend::Credential(credential) => credential,
        };

        // Fast path: valid cached token
        {
            let cache = self.cached_token.read().await;
            if let Some(ref cached) = *cache
                && !cached.is_expired()
            {
                return Ok(cached.bearer_header.clone());
            }
        }

        let mut cache = self.cached_token.write().await;

        // Double-check after acquiring the write lock
        if let Some(ref cached) = *cache
            && !cached.is_expired()
        {
            return Ok(cached.bearer_header.clone());
        }

        let access_token: AccessToken = credential
            .get_token(&[ARM_SCOPE], None)
            .await
            .map_err(|e| AzureError::Auth(format!("Failed to get ARM token: {}", e)))?;

        let now = time::OffsetDateTime::now_utc();
        let expires_in = access_token.expires_on - now;
        let expires_in_secs = expires_in.whole_seconds().max(0) as u64;
        let safety_margin = std::time::Duration::from_secs(TOKEN_REFRESH_BUFFER_SECS);
        let expires_at = std::time::Instant::now()
            + std::time::Duration::from_secs(expires_in_secs).saturating_sub(safety_margin);

        let bearer_header: Arc<str> = format!("Bearer {}", access_token.token.secret()).into();

        *cache = Some(CachedToken {
            bearer_header: bearer_header.clone(),
            expires_at,
        });

        tracing::debug!(expires_in_secs, "Acquired new ARM token");

        Ok(bearer_header)
    }
}
