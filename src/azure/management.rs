//! Azure Resource Manager client for VM images and resource groups.
//!
//! Thin reqwest wrapper over the management REST API. Listing follows
//! `nextLink` pagination transparently; deletes are long-running operations
//! that return a [`PendingOperation`] to be awaited with
//! [`ManagementClient::wait`].

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{AzureError, Image, ResourceGroup, auth::ArmTokenSource};

const COMPUTE_API_VERSION: &str = "2023-03-01";
const RESOURCES_API_VERSION: &str = "2021-04-01";

/// Default delay between polls of a long-running operation, used when the
/// service does not send `Retry-After`.
const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Handle for a submitted delete operation.
///
/// `poll_url` is the `Azure-AsyncOperation` (or `Location`) URL to poll; a
/// handle without one is already complete.
#[derive(Debug)]
pub struct PendingOperation {
    pub(crate) resource: String,
    pub(crate) poll_url: Option<String>,
}

impl PendingOperation {
    /// A handle for an operation that completed synchronously.
    pub fn completed(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            poll_url: None,
        }
    }
}

/// One page of an ARM list response.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

/// Terminal and in-flight states of a long-running operation.
#[derive(Debug, Deserialize)]
struct OperationStatus {
    status: String,
}

/// Client for the Azure management plane.
pub struct ManagementClient {
    http: reqwest::Client,
    endpoint: String,
    subscription_id: String,
    resource_group: String,
    tokens: ArmTokenSource,
    poll_interval: std::time::Duration,
}

impl ManagementClient {
    pub fn new(
        endpoint: &str,
        subscription_id: &str,
        resource_group: &str,
        tokens: ArmTokenSource,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            subscription_id: subscription_id.to_string(),
            resource_group: resource_group.to_string(),
            tokens,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval. Tests use this to keep polling fast.
    #[cfg(test)]
    pub fn with_poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// List the VM images in the configured resource group.
    pub async fn list_images(&self) -> Result<Vec<Image>, AzureError> {
        let url = format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/images?api-version={}",
            self.endpoint, self.subscription_id, self.resource_group, COMPUTE_API_VERSION
        );
        self.list(url).await
    }

    /// List every resource group in the subscription.
    pub async fn list_groups(&self) -> Result<Vec<ResourceGroup>, AzureError> {
        let url = format!(
            "{}/subscriptions/{}/resourcegroups?api-version={}",
            self.endpoint, self.subscription_id, RESOURCES_API_VERSION
        );
        self.list(url).await
    }

    /// Submit a delete of an image in the configured resource group.
    pub async fn begin_delete_image(&self, name: &str) -> Result<PendingOperation, AzureError> {
        let url = format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/images/{}?api-version={}",
            self.endpoint, self.subscription_id, self.resource_group, name, COMPUTE_API_VERSION
        );
        self.begin_delete(url, format!("image {}", name)).await
    }

    /// Submit a delete of a resource group.
    pub async fn begin_delete_group(&self, name: &str) -> Result<PendingOperation, AzureError> {
        let url = format!(
            "{}/subscriptions/{}/resourcegroups/{}?api-version={}",
            self.endpoint, self.subscription_id, name, RESOURCES_API_VERSION
        );
        self.begin_delete(url, format!("group {}", name)).await
    }

    /// Poll a submitted delete until it reaches a terminal state.
    ///
    /// Honors `Retry-After` between polls. No timeout is applied beyond
    /// whatever the transport enforces.
    pub async fn wait(&self, op: PendingOperation) -> Result<(), AzureError> {
        let Some(url) = op.poll_url else {
            return Ok(());
        };

        loop {
            let resp = self.get(&url).await?;
            let status = resp.status();
            let delay = retry_after(resp.headers()).unwrap_or(self.poll_interval);

            if status == reqwest::StatusCode::ACCEPTED || status == reqwest::StatusCode::CREATED {
                tokio::time::sleep(delay).await;
            } else if status.is_success() {
                let body = resp.text().await?;
                match serde_json::from_str::<OperationStatus>(&body) {
                    Ok(op_status) if op_status.status.eq_ignore_ascii_case("succeeded") => {
                        return Ok(());
                    }
                    Ok(op_status)
                        if op_status.status.eq_ignore_ascii_case("failed")
                            || op_status.status.eq_ignore_ascii_case("canceled") =>
                    {
                        return Err(AzureError::Operation {
                            resource: op.resource,
                            status: op_status.status,
                        });
                    }
                    // InProgress and friends
                    Ok(_) => tokio::time::sleep(delay).await,
                    // A success response without an operation body means the
                    // resource is gone
                    Err(_) => return Ok(()),
                }
            } else {
                let body = resp.text().await.unwrap_or_default();
                return Err(AzureError::Api { status, url, body });
            }
        }
    }

    /// Fetch all pages of a list endpoint, following `nextLink`.
    async fn list<T: DeserializeOwned>(&self, first_url: String) -> Result<Vec<T>, AzureError> {
        let mut url = Some(first_url);
        let mut results = Vec::new();

        while let Some(current) = url {
            let resp = self.get(&current).await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(AzureError::Api {
                    status,
                    url: current,
                    body,
                });
            }

            let page: Page<T> = resp.json().await?;
            results.extend(page.value);
            url = page.next_link;
        }

        Ok(results)
    }

    async fn begin_delete(
        &self,
        url: String,
        resource: String,
    ) -> Result<PendingOperation, AzureError> {
        let bearer = self.tokens.bearer_header().await?;
        let resp = self
            .http
            .delete(&url)
            .header(reqwest::header::AUTHORIZATION, bearer.as_ref())
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::ACCEPTED || status == reqwest::StatusCode::CREATED {
            let poll_url = resp
                .headers()
                .get("azure-asyncoperation")
                .or_else(|| resp.headers().get(reqwest::header::LOCATION))
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(PendingOperation { resource, poll_url })
        } else if status.is_success() {
            Ok(PendingOperation::completed(resource))
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(AzureError::Api { status, url, body })
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, AzureError> {
        let bearer = self.tokens.bearer_header().await?;
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, bearer.as_ref())
            .send()
            .await?;
        Ok(resp)
    }
}

/// Parse a `Retry-After` header as whole seconds.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<std::time::Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(std::time::Duration::from_secs)
}
