//! Transport configuration.

use bytesize::ByteSize;
use displaydoc::Display;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

const DEFAULT_MAX_BODY_SIZE: ByteSize = ByteSize::kib(100);

fn default_max_body_size() -> ByteSize {
    DEFAULT_MAX_BODY_SIZE
}

fn default_endpoint() -> String {
    String::from("/graphql")
}

/// Configuration errors.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not parse configuration: {0}
    Parse(#[from] serde_yaml::Error),

    /// invalid endpoint '{0}': it must start with '/'
    InvalidEndpoint(String),
}

/// Configuration for the GraphQL HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Maximum size of a request body after decompression; defaults to 100KiB
    #[serde(default = "default_max_body_size")]
    #[schemars(with = "String", default = "default_max_body_size")]
    pub max_body_size: ByteSize,

    /// The path the GraphQL endpoint is mounted on; defaults to /graphql
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder]
    pub fn new(max_body_size: Option<ByteSize>, endpoint: Option<String>) -> Self {
        Self {
            max_body_size: max_body_size.unwrap_or_else(default_max_body_size),
            endpoint: endpoint.unwrap_or_else(default_endpoint),
        }
    }

    /// Parses and validates a YAML (or JSON) configuration document.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigurationError> {
        let configuration: Configuration = serde_yaml::from_str(raw)?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.endpoint.starts_with('/') {
            return Err(ConfigurationError::InvalidEndpoint(self.endpoint.clone()));
        }
        Ok(())
    }

    /// The body limit in bytes.
    pub(crate) fn body_limit(&self) -> usize {
        usize::try_from(self.max_body_size.as_u64()).unwrap_or(usize::MAX)
    }
}
