use crate::fec::FecConfig;
use crate::stealth::StealthConfig;
use std::path::Path;

/// Unified configuration parsed from a TOML file, with `STEALTH_*`
/// environment variables layered on top.
#[derive(Clone, Default)]
pub struct AppConfig {
    pub fec: FecConfig,
    pub stealth: StealthConfig,
}

impl AppConfig {
    /// Load configuration from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            fec: FecConfig::from_toml(s)?,
            stealth: StealthConfig::from_toml(s)?,
        })
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) -> Result<(), crate::error::CoreError> {
        self.stealth.apply_env()
    }

    /// Validate all sub-configurations.
    pub fn validate(&self) -> Result<(), String> {
        self.fec.validate()?;
        self.stealth.validate()?;
        Ok(())
    }
}
