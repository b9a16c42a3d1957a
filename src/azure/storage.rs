//! Blob container access for the image VHDs.
//!
//! Wraps the blob service client from the Azure SDK; listing is flat (the
//! container holds a single level of `.vhd` blobs) and paginated by the SDK.

use std::sync::Arc;

use azure_core::credentials::TokenCredential;
use azure_storage_blob::BlobContainerClient;
use futures::TryStreamExt;

use super::{AzureError, Blob};

/// Client for the configured blob container.
pub struct BlobStore {
    container: BlobContainerClient,
}

impl BlobStore {
    pub fn new(
        endpoint: &str,
        container: &str,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, AzureError> {
        let container = BlobContainerClient::new(endpoint, container, Some(credential), None)?;
        Ok(Self { container })
    }

    /// List every blob in the container.
    pub async fn list_blobs(&self) -> Result<Vec<Blob>, AzureError> {
        let mut blobs = Vec::new();

        let mut pager = self.container.list_blobs(None)?;
        while let Some(item) = pager.try_next().await? {
            if let Some(name) = item.name.and_then(|n| n.content) {
                blobs.push(Blob { name });
            }
        }

        Ok(blobs)
    }

    /// Delete a single blob.
    pub async fn delete_blob(&self, name: &str) -> Result<(), AzureError> {
        self.container
            .blob_client(name)
            .delete(None)
            .await?;
        Ok(())
    }
}
