//! Profile parsing
//!
//! TOML is the primary format, JSON is accepted too.

use contracts::{AcquisitionProfile, ConfigError};

/// Profile file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Infer format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml(content: &str) -> Result<AcquisitionProfile, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse_json(content: &str) -> Result<AcquisitionProfile, ConfigError> {
    serde_json::from_str(content).map_err(|e| ConfigError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<AcquisitionProfile, ConfigError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ProcessingMode, ShutterKind, SizeRestriction};

    #[test]
    fn test_parse_toml_descriptor() {
        let content = r#"
[[cameras]]
id = 2
name = "Falcon"
family = "fei"
sensor_width = 4096
sensor_height = 4096
binnings = [1, 2, 4]

[cameras.restriction]
type = "block"
block = 128

[cameras.capabilities]
shutter = "beam_blank_only"
retractable = true
processes_internally = true
"#;
        let profile = parse_toml(content).unwrap();
        let cam = &profile.cameras[0];
        assert_eq!(cam.restriction, SizeRestriction::Block { block: 128 });
        assert_eq!(cam.capabilities.shutter, ShutterKind::BeamBlankOnly);
        assert!(cam.capabilities.retractable);
        assert!(cam.capabilities.reliable_shutter_feedback);
        assert!(profile.control_sets.is_empty());
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "cameras": [{
                "id": 1,
                "name": "sim",
                "family": "simulated",
                "sensor_width": 1024,
                "sensor_height": 1024,
                "binnings": [1, 2]
            }],
            "control_sets": [{
                "name": "view",
                "kind": "view",
                "camera": 1,
                "exposure_s": 0.1,
                "processing": "dark_subtracted"
            }]
        }"#;
        let profile = parse_json(content).unwrap();
        assert_eq!(
            profile.control_sets[0].processing,
            ProcessingMode::DarkSubtracted
        );
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let result = parse_toml("invalid toml [[[");
        assert!(matches!(result, Err(ConfigError::ConfigParse { .. })));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
