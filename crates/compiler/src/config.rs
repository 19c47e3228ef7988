//! Compiler configuration
//!
//! Warning classes can be toggled from a small TOML file passed to the
//! driver with `--config`. Everything defaults to on; the file only
//! needs to name the switches it wants to flip:
//!
//! ```toml
//! [warnings]
//! unused_value = false
//! shadow = false
//! ```

use serde::Deserialize;

/// Per-class warning switches consulted by the semantic analyzer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarningConfig {
    /// Implicit conversions that change type or may lose bits.
    pub conversion: bool,
    /// Computed expression values that are not used.
    pub unused_value: bool,
    /// Strict-enum mixing and unhandled enumerators in switch.
    pub enum_handling: bool,
    /// Qualifiers written against the (const, restrict, volatile) order.
    pub qualifier_order: bool,
    /// Declarations shadowing a name from an outer scope.
    pub shadow: bool,
    /// Constant bit-field writes that do not fit the field.
    pub bitfield_range: bool,
    /// Relational operators over mixed signedness.
    pub mixed_sign: bool,
}

impl Default for WarningConfig {
    fn default() -> Self {
        WarningConfig {
            conversion: true,
            unused_value: true,
            enum_handling: true,
            qualifier_order: true,
            shadow: true,
            bitfield_range: true,
            mixed_sign: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub warnings: WarningConfig,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("Failed to parse config: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_all_on() {
        let config = CompilerConfig::new();
        assert!(config.warnings.conversion);
        assert!(config.warnings.unused_value);
        assert!(config.warnings.mixed_sign);
    }

    #[test]
    fn test_partial_override() {
        let config = CompilerConfig::from_toml("[warnings]\nunused_value = false\n").unwrap();
        assert!(!config.warnings.unused_value);
        assert!(config.warnings.conversion);
    }

    #[test]
    fn test_empty_config() {
        let config = CompilerConfig::from_toml("").unwrap();
        assert!(config.warnings.shadow);
    }

    #[test]
    fn test_bad_config_rejected() {
        assert!(CompilerConfig::from_toml("warnings = 3").is_err());
    }
}
