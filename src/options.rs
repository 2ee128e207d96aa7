use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gpx_types::DEFAULT_CREATOR;

/// Settings for driving the `gpsbabel` executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BabelConfig {
    /// Path or name of the converter (default: "gpsbabel")
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Reset flags, chain and stdin buffer after every run (default: true)
    #[serde(default = "default_true")]
    pub auto_clear: bool,

    /// Charset placed before file actions that do not name one (default: "UTF-8")
    #[serde(default = "default_charset")]
    pub default_charset: String,

    /// Level passed with `-D` when a run asks for debugging (default: 10)
    #[serde(default = "default_debug_level")]
    pub debug_level: u32,

    /// Accepted `-V` banners; empty disables the check
    #[serde(default = "default_supported_versions")]
    pub supported_versions: Vec<String>,

    /// `creator` attribute written on serialized documents
    #[serde(default = "default_creator")]
    pub creator: String,
}

impl Default for BabelConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            auto_clear: true,
            default_charset: default_charset(),
            debug_level: default_debug_level(),
            supported_versions: default_supported_versions(),
            creator: default_creator(),
        }
    }
}

impl BabelConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn accepts_version(&self, banner: &str) -> bool {
        self.supported_versions.is_empty() || self.supported_versions.iter().any(|v| v == banner)
    }
}

fn default_true() -> bool {
    true
}

fn default_executable() -> String {
    "gpsbabel".to_string()
}

fn default_charset() -> String {
    "UTF-8".to_string()
}

fn default_debug_level() -> u32 {
    10
}

fn default_supported_versions() -> Vec<String> {
    vec![
        "GPSBabel Version 1.3.5".to_string(),
        "GPSBabel Version 1.3.3".to_string(),
    ]
}

fn default_creator() -> String {
    DEFAULT_CREATOR.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = BabelConfig::from_json("{}").unwrap();
        assert_eq!(config, BabelConfig::default());
        assert_eq!(config.executable, "gpsbabel");
        assert!(config.auto_clear);
        assert_eq!(config.debug_level, 10);
    }

    #[test]
    fn test_camel_case_keys() {
        let config = BabelConfig::from_json(
            r#"{"executable": "/opt/gpsbabel", "autoClear": false, "supportedVersions": []}"#,
        )
        .unwrap();
        assert_eq!(config.executable, "/opt/gpsbabel");
        assert!(!config.auto_clear);
        assert!(config.accepts_version("GPSBabel Version 1.9.0"));
    }

    #[test]
    fn test_version_allow_list() {
        let config = BabelConfig::default();
        assert!(config.accepts_version("GPSBabel Version 1.3.5"));
        assert!(!config.accepts_version("GPSBabel Version 1.4.0"));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        assert!(matches!(
            BabelConfig::from_json("{\"autoClear\": 3}"),
            Err(crate::error::Error::Config(_))
        ));
    }
}
