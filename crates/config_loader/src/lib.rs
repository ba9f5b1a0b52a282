//! # Config Loader
//!
//! Acquisition profile loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON profile files
//! - Validate camera descriptors, core configuration and control sets
//! - Produce an `AcquisitionProfile`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let profile = ConfigLoader::load_from_path(Path::new("profile.toml")).unwrap();
//! println!("cameras: {}", profile.cameras.len());
//! ```

mod parser;
mod validator;

pub use contracts::AcquisitionProfile;
pub use parser::ConfigFormat;

use contracts::ConfigError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load profiles from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a profile from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<AcquisitionProfile, ConfigError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load a profile from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<AcquisitionProfile, ConfigError> {
        Self::parse_and_validate(content, format)
    }

    /// Validate an already constructed profile
    pub fn validate(profile: &AcquisitionProfile) -> Result<(), ConfigError> {
        validator::validate(profile)
    }

    /// Serialize a profile to TOML string
    pub fn to_toml(profile: &AcquisitionProfile) -> Result<String, ConfigError> {
        toml::to_string_pretty(profile)
            .map_err(|e| ConfigError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize a profile to JSON string
    pub fn to_json(profile: &AcquisitionProfile) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(profile)
            .map_err(|e| ConfigError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ConfigError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext)
            .ok_or_else(|| ConfigError::config_parse(format!("unsupported config format: .{ext}")))
    }

    fn read_file(path: &Path) -> Result<String, ConfigError> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<AcquisitionProfile, ConfigError> {
        let profile = parser::parse(content, format)?;
        validator::validate(&profile)?;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL_TOML: &str = r#"
[[cameras]]
id = 1
name = "K3"
family = "gatan"
sensor_width = 4096
sensor_height = 4096
binnings = [2, 4, 8]

[cameras.restriction]
type = "modulo"
size_x = 64
size_y = 64
offset_x = 32
offset_y = 32

[acquisition]
retry_limit = 3

[[control_sets]]
name = "record"
camera = 1
exposure_s = 0.5
processing = "gain_normalized"
"#;

    #[test]
    fn test_load_from_str_toml() {
        let result = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let profile = result.unwrap();
        assert_eq!(profile.cameras[0].name, "K3");
        assert_eq!(profile.acquisition.retry_limit, 3);
        assert_eq!(profile.acquisition.scheduler_tick_ms, 10);
        assert!(profile.control_set("record").is_some());
    }

    #[test]
    fn test_round_trip_toml() {
        let profile = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&profile).unwrap();
        let reloaded = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(profile, reloaded);
    }

    #[test]
    fn test_round_trip_json() {
        let profile = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&profile).unwrap();
        let reloaded = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(profile.cameras, reloaded.cameras);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = MINIMAL_TOML.replace("camera = 1", "camera = 9");
        let result = ConfigLoader::load_from_str(&content, ConfigFormat::Toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("unknown camera"));
    }

    #[test]
    fn test_load_from_path_detects_format() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(MINIMAL_TOML.as_bytes()).unwrap();
        let profile = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(profile.cameras.len(), 1);

        let bad = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::load_from_path(bad.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }
}
