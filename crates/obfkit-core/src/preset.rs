//! Obfuscation presets and their pass lists.

use crate::error::ObfError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Encrypts string constants; decrypted at runtime by the support module.
pub const STRING_OBF: &str = "string-obf";

/// Inserts opaque-predicate guarded dead blocks.
pub const BOGUS_INSERT: &str = "bogus-insert";

/// Obfuscation intensity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// string-obf
    Light,

    /// string-obf, bogus-insert
    #[default]
    Balanced,
}

impl Preset {
    pub const ALL: [Preset; 2] = [Preset::Light, Preset::Balanced];

    /// Get the preset name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Preset::Light => "light",
            Preset::Balanced => "balanced",
        }
    }

    /// Ordered pass names this preset runs.
    pub fn passes(&self) -> &'static [&'static str] {
        match self {
            Preset::Light => &[STRING_OBF],
            Preset::Balanced => &[STRING_OBF, BOGUS_INSERT],
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = ObfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Preset::Light),
            "balanced" => Ok(Preset::Balanced),
            _ => Err(ObfError::UnknownPreset(s.to_string())),
        }
    }
}

/// Resolve a preset to its ordered pass list.
pub fn resolve(preset: Preset) -> Vec<String> {
    preset.passes().iter().map(|p| (*p).to_string()).collect()
}

/// Resolve a preset by name. Unknown names are an error, never defaulted.
pub fn resolve_named(name: &str) -> crate::Result<Vec<String>> {
    Ok(resolve(name.parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_light() {
        assert_eq!(resolve(Preset::Light), vec!["string-obf"]);
    }

    #[test]
    fn test_resolve_balanced() {
        assert_eq!(resolve(Preset::Balanced), vec!["string-obf", "bogus-insert"]);
    }

    #[test]
    fn test_every_preset_is_nonempty_and_deterministic() {
        for preset in Preset::ALL {
            let first = resolve(preset);
            assert!(!first.is_empty(), "{preset} resolved to no passes");
            assert_eq!(first, resolve(preset));
        }
    }

    #[test]
    fn test_light_is_strict_prefix_of_balanced() {
        let light = resolve(Preset::Light);
        let balanced = resolve(Preset::Balanced);
        assert!(light.len() < balanced.len());
        assert_eq!(&balanced[..light.len()], light.as_slice());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("light".parse::<Preset>().unwrap(), Preset::Light);
        assert_eq!("Balanced".parse::<Preset>().unwrap(), Preset::Balanced);
        assert_eq!(Preset::default(), Preset::Balanced);
    }

    #[test]
    fn test_unknown_preset_is_error() {
        let err = resolve_named("aggressive").unwrap_err();
        assert!(matches!(err, ObfError::UnknownPreset(name) if name == "aggressive"));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Preset::Light).unwrap(), "\"light\"");
        let p: Preset = serde_json::from_str("\"balanced\"").unwrap();
        assert_eq!(p, Preset::Balanced);
    }
}
