//! Static client metadata sent with every request.

use serde::{Deserialize, Serialize};

/// Identifies the client build to the backend.
///
/// Serialized as JSON into the client-info header of each request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// SDK name.
    pub sdk: String,
    /// SDK version.
    #[serde(rename = "sdkv")]
    pub sdk_version: String,
    /// Operating system name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Host platform, e.g. the runtime or device family.
    #[serde(rename = "pl", default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl ClientInfo {
    /// Creates client metadata for the given SDK name and version.
    pub fn new(sdk: impl Into<String>, sdk_version: impl Into<String>) -> Self {
        Self {
            sdk: sdk.into(),
            sdk_version: sdk_version.into(),
            os: None,
            platform: None,
        }
    }

    /// Sets the operating system.
    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    /// Sets the platform.
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Renders the header value.
    pub fn to_header_value(&self) -> String {
        // A struct of strings always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self::new("rust", env!("CARGO_PKG_VERSION")).with_os(std::env::consts::OS)
    }
}
