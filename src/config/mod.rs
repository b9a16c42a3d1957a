//! Configuration for the purge tool.
//!
//! Configured via an optional TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax. When no file is given,
//! the defaults reproduce the historical constants of the tool, with the
//! subscription taken from `AZURE_SUBSCRIPTION_ID`.
//!
//! # Example
//!
//! ```toml
//! [azure]
//! subscription_id = "${AZURE_SUBSCRIPTION_ID}"
//! resource_group = "images"
//! storage_account = "openshiftimages"
//! container = "images"
//!
//! [retention]
//! keep_images = 5
//! build_timeout_hours = 6
//! group_timeout_hours = 72
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Root configuration for the purge tool.
///
/// All sections are optional with defaults, allowing a zero-config run
/// against the standard image build subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurgeConfig {
    /// Azure scope: subscription, resource group, and storage location.
    #[serde(default)]
    pub azure: AzureConfig,

    /// Retention thresholds for the purge routines.
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl PurgeConfig {
    /// Load configuration from an optional TOML file path.
    ///
    /// When `path` is `None`, defaults are used (and still validated, so a
    /// missing `AZURE_SUBSCRIPTION_ID` is reported up front rather than as
    /// a failed API call).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let mut config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        let mut config: PurgeConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.azure.subscription_id.is_empty() {
            return Err(ConfigError::Validation(
                "azure.subscription_id is not set and AZURE_SUBSCRIPTION_ID is not in the \
                 environment"
                    .into(),
            ));
        }
        if self.azure.resource_group.is_empty() {
            return Err(ConfigError::Validation("azure.resource_group is empty".into()));
        }
        if self.azure.storage_account.is_empty() {
            return Err(ConfigError::Validation("azure.storage_account is empty".into()));
        }
        if self.azure.container.is_empty() {
            return Err(ConfigError::Validation("azure.container is empty".into()));
        }
        if self.retention.keep_images == 0 {
            return Err(ConfigError::Validation(
                "retention.keep_images must be at least 1; a value of 0 would delete every \
                 image in the resource group"
                    .into(),
            ));
        }
        for (name, hours) in [
            ("build_timeout_hours", self.retention.build_timeout_hours),
            ("group_timeout_hours", self.retention.group_timeout_hours),
        ] {
            if hours > MAX_TIMEOUT_HOURS {
                return Err(ConfigError::Validation(format!(
                    "retention.{name} is {hours}; the maximum is {MAX_TIMEOUT_HOURS} hours"
                )));
            }
        }
        Ok(())
    }
}

/// Azure scope the tool operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AzureConfig {
    /// Subscription to manage. Defaults to `AZURE_SUBSCRIPTION_ID`.
    #[serde(default = "default_subscription_id")]
    pub subscription_id: String,

    /// Resource group holding the VM images.
    #[serde(default = "default_resource_group")]
    pub resource_group: String,

    /// Storage account holding the VHD blobs.
    #[serde(default = "default_storage_account")]
    pub storage_account: String,

    /// Blob container within the storage account.
    #[serde(default = "default_container")]
    pub container: String,

    /// Azure Resource Manager endpoint. Overridable for testing.
    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,

    /// Blob service endpoint. When unset, derived from the storage account.
    #[serde(default)]
    pub blob_endpoint: Option<String>,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            subscription_id: default_subscription_id(),
            resource_group: default_resource_group(),
            storage_account: default_storage_account(),
            container: default_container(),
            management_endpoint: default_management_endpoint(),
            blob_endpoint: None,
        }
    }
}

impl AzureConfig {
    /// The blob service endpoint, derived from the storage account when not
    /// set explicitly.
    pub fn blob_endpoint(&self) -> String {
        self.blob_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", self.storage_account))
    }
}

fn default_subscription_id() -> String {
    std::env::var("AZURE_SUBSCRIPTION_ID").unwrap_or_default()
}

fn default_resource_group() -> String {
    "images".to_string()
}

fn default_storage_account() -> String {
    "openshiftimages".to_string()
}

fn default_container() -> String {
    "images".to_string()
}

fn default_management_endpoint() -> String {
    "https://management.azure.com".to_string()
}

/// Retention thresholds for the purge routines.
///
/// `build_timeout_hours` is the grace period during which a freshly created
/// image or blob is exempt from deletion regardless of validity or orphan
/// status. It covers the same build-pipeline window in both routines, so it
/// is a single knob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Number of most recent images to keep per name prefix.
    #[serde(default = "default_keep_images")]
    pub keep_images: usize,

    /// Grace period for freshly built images and in-flight blob uploads.
    #[serde(default = "default_build_timeout_hours")]
    pub build_timeout_hours: u64,

    /// Maximum lifetime of a resource group tagged with a creation epoch.
    #[serde(default = "default_group_timeout_hours")]
    pub group_timeout_hours: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_images: default_keep_images(),
            build_timeout_hours: default_build_timeout_hours(),
            group_timeout_hours: default_group_timeout_hours(),
        }
    }
}

fn default_keep_images() -> usize {
    5
}

fn default_build_timeout_hours() -> u64 {
    6
}

fn default_group_timeout_hours() -> u64 {
    72
}

/// A century in hours. Caps the timeout knobs so they stay well inside
/// `i64` range when converted to signed durations downstream.
const MAX_TIMEOUT_HOURS: u64 = 876_600;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Variables appearing after a `#` comment on a line are left alone.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let whole = cap.get(0).unwrap();

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        temp_env::with_var("AZURE_SUBSCRIPTION_ID", Some("sub-from-env"), || {
            let config = PurgeConfig::load(None).unwrap();
            assert_eq!(config.azure.subscription_id, "sub-from-env");
            assert_eq!(config.azure.resource_group, "images");
            assert_eq!(config.azure.storage_account, "openshiftimages");
            assert_eq!(config.azure.container, "images");
            assert_eq!(config.retention.keep_images, 5);
            assert_eq!(config.retention.build_timeout_hours, 6);
            assert_eq!(config.retention.group_timeout_hours, 72);
        });
    }

    #[test]
    fn test_missing_subscription_is_rejected() {
        temp_env::with_var("AZURE_SUBSCRIPTION_ID", None::<&str>, || {
            let err = PurgeConfig::load(None).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
        });
    }

    #[test]
    fn test_env_interpolation() {
        temp_env::with_var("TEST_PURGE_SUB", Some("interpolated"), || {
            let config = PurgeConfig::from_toml(
                r#"
                [azure]
                subscription_id = "${TEST_PURGE_SUB}"
                "#,
            )
            .unwrap();
            assert_eq!(config.azure.subscription_id, "interpolated");
        });
    }

    #[test]
    fn test_env_interpolation_skips_comments() {
        temp_env::with_var("AZURE_SUBSCRIPTION_ID", Some("sub"), || {
            let config = PurgeConfig::from_toml(
                r#"
                [azure]
                subscription_id = "sub" # was "${NONEXISTENT_PURGE_VAR}"
                "#,
            )
            .unwrap();
            assert_eq!(config.azure.subscription_id, "sub");
        });
    }

    #[test]
    fn test_missing_env_var_is_an_error() {
        let err = PurgeConfig::from_toml(
            r#"
            [azure]
            subscription_id = "${NONEXISTENT_PURGE_VAR}"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "NONEXISTENT_PURGE_VAR"));
    }

    #[test]
    fn test_zero_keep_images_is_rejected() {
        let err = PurgeConfig::from_toml(
            r#"
            [azure]
            subscription_id = "sub"

            [retention]
            keep_images = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_oversized_timeout_is_rejected() {
        let err = PurgeConfig::from_toml(
            r#"
            [azure]
            subscription_id = "sub"

            [retention]
            group_timeout_hours = 9000000000
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = PurgeConfig::from_toml(
            r#"
            [azure]
            subscription_id = "sub"
            storage_acount = "typo"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_blob_endpoint_derived_from_account() {
        let config = PurgeConfig::from_toml(
            r#"
            [azure]
            subscription_id = "sub"
            storage_account = "myaccount"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.azure.blob_endpoint(),
            "https://myaccount.blob.core.windows.net"
        );
    }

    #[test]
    fn test_blob_endpoint_override() {
        let config = PurgeConfig::from_toml(
            r#"
            [azure]
            subscription_id = "sub"
            blob_endpoint = "http://127.0.0.1:10000/devstoreaccount1"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.azure.blob_endpoint(),
            "http://127.0.0.1:10000/devstoreaccount1"
        );
    }
}
