//! Azure client layer.
//!
//! Everything that talks to Azure lives here: credential acquisition,
//! management-plane calls for VM images and resource groups, and blob
//! storage access. The purge routines only see the [`CloudResources`]
//! trait, which keeps the decision logic testable without a subscription.

pub mod auth;
pub mod management;
pub mod storage;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::AzureConfig;
pub use management::PendingOperation;

/// A managed VM image as listed from the resource group.
///
/// The name conventionally ends in a 12-digit `YYYYMMDDHHMM` build
/// timestamp; tags may include `valid`.
#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    pub name: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// A blob in the image container. Conventionally `<prefix>-<timestamp>.vhd`.
#[derive(Debug, Clone)]
pub struct Blob {
    pub name: String,
}

/// A resource group. Tags may include `now`, a Unix-epoch-seconds string
/// recording when the group was created.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceGroup {
    pub name: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Errors from the Azure client layer.
#[derive(Debug, Error)]
pub enum AzureError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Azure API returned {status} for {url}: {body}")]
    Api {
        status: reqwest::StatusCode,
        url: String,
        body: String,
    },

    #[error("Delete of {resource} ended in state {status}")]
    Operation { resource: String, status: String },

    #[error("Storage error: {0}")]
    Storage(#[from] azure_core::Error),
}

/// The slice of the Azure API this tool depends on.
///
/// Deletes of images and groups are long-running operations: `begin_delete_*`
/// submits the request and returns a handle, `wait` blocks until the
/// operation completes. Blob deletes finish in a single call.
#[async_trait]
pub trait CloudResources: Send + Sync {
    async fn list_images(&self) -> Result<Vec<Image>, AzureError>;
    async fn begin_delete_image(&self, name: &str) -> Result<PendingOperation, AzureError>;

    async fn list_groups(&self) -> Result<Vec<ResourceGroup>, AzureError>;
    async fn begin_delete_group(&self, name: &str) -> Result<PendingOperation, AzureError>;

    /// Wait for a submitted delete to reach a terminal state.
    async fn wait(&self, op: PendingOperation) -> Result<(), AzureError>;

    async fn list_blobs(&self) -> Result<Vec<Blob>, AzureError>;
    async fn delete_blob(&self, name: &str) -> Result<(), AzureError>;
}

/// Production [`CloudResources`] implementation backed by the Azure REST API
/// for the management plane and the blob service for storage.
pub struct AzureApi {
    management: management::ManagementClient,
    blobs: storage::BlobStore,
}

impl AzureApi {
    /// Build the API clients from configuration.
    ///
    /// A single credential chain is shared between the management token
    /// source and the blob client.
    pub fn new(config: &AzureConfig) -> Result<Self, AzureError> {
        let credential = auth::build_credential()?;
        let tokens = auth::ArmTokenSource::new(credential.clone());

        let management = management::ManagementClient::new(
            &config.management_endpoint,
            &config.subscription_id,
            &config.resource_group,
            tokens,
        );
        let blobs = storage::BlobStore::new(&config.blob_endpoint(), &config.container, credential)?;

        Ok(Self { management, blobs })
    }
}

#[async_trait]
impl CloudResources for AzureApi {
    async fn list_images(&self) -> Result<Vec<Image>, AzureError> {
        self.management.list_images().await
    }

    async fn begin_delete_image(&self, name: &str) -> Result<PendingOperation, AzureError> {
        self.management.begin_delete_image(name).await
    }

    async fn list_groups(&self) -> Result<Vec<ResourceGroup>, AzureError> {
        self.management.list_groups().await
    }

    async fn begin_delete_group(&self, name: &str) -> Result<PendingOperation, AzureError> {
        self.management.begin_delete_group(name).await
    }

    async fn wait(&self, op: PendingOperation) -> Result<(), AzureError> {
        self.management.wait(op).await
    }

    async fn list_blobs(&self) -> Result<Vec<Blob>, AzureError> {
        self.blobs.list_blobs().await
    }

    async fn delete_blob(&self, name: &str) -> Result<(), AzureError> {
        self.blobs.delete_blob(name).await
    }
}
