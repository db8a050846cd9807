//! Build configuration (lvlpak.toml)
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. Command-line flags are applied on top by the CLI.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::format::{Endian, PositionLayout};
use crate::packer::PackOptions;

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Where the Fixup Table goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixupMode {
    /// Inside the header, right after the fixup-table pointer
    #[default]
    Front,
    /// After the packed chunks
    End,
    /// No fixup table; every reference stays unresolved
    None,
}

impl std::str::FromStr for FixupMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "front" => Ok(FixupMode::Front),
            "end" => Ok(FixupMode::End),
            "none" => Ok(FixupMode::None),
            other => Err(format!("unknown fixup mode '{}' (expected front, end or none)", other)),
        }
    }
}

/// What to do when a section name is defined twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Fail the build
    #[default]
    Error,
    /// Keep the first definition and warn
    Ignore,
}

/// `[bundle]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BundleSettings {
    /// Root section name
    pub root: String,
    /// Chunk size in bytes
    pub chunk_size: u32,
    /// Pad granularity for placed items
    pub pad_size: u32,
    /// Byte order of the output
    pub endian: Endian,
    /// Content deduplication
    pub dedup: bool,
    /// Fixup table placement
    pub fixups: FixupMode,
    /// Hardware sector size the file is padded to (0 disables)
    pub sector_size: u32,
    /// Keep discovery order instead of sorting by size
    pub pinned_order: bool,
    /// Duplicate section handling
    pub duplicate_sections: DuplicatePolicy,
    /// Upper bound on header-estimate passes
    pub max_layout_passes: u32,
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            root: "root".to_string(),
            chunk_size: 32768,
            pad_size: 4,
            endian: Endian::Little,
            dedup: true,
            fixups: FixupMode::Front,
            sector_size: 0,
            pinned_order: false,
            duplicate_sections: DuplicatePolicy::Error,
            max_layout_passes: 16,
        }
    }
}

/// `[paths]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PathSettings {
    /// Global input directories, relative to the config file
    pub search: Vec<PathBuf>,
}

/// Complete build configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BundleConfig {
    /// Bundle layout settings
    pub bundle: BundleSettings,
    /// Input search paths
    pub paths: PathSettings,
    /// `$(NAME)` substitutions
    pub defines: BTreeMap<String, String>,
    /// Directory relative search paths are resolved against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl BundleConfig {
    /// Parse a config file; relative search paths resolve against its directory
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_str(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parse a config from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: BundleConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bundle = &self.bundle;
        if bundle.root.is_empty() {
            return Err(ConfigError::ValidationError(
                "Root section name cannot be empty".to_string(),
            ));
        }
        PositionLayout::for_chunk_size(bundle.chunk_size)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        if bundle.pad_size == 0 || bundle.pad_size % 4 != 0 || bundle.pad_size > bundle.chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "Invalid pad_size {}: must be a non-zero multiple of 4 no larger than chunk_size",
                bundle.pad_size
            )));
        }
        if bundle.sector_size % 4 != 0 || bundle.sector_size > bundle.chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "Invalid sector_size {}: must be 0 or a multiple of 4 no larger than chunk_size",
                bundle.sector_size
            )));
        }
        if bundle.max_layout_passes == 0 {
            return Err(ConfigError::ValidationError(
                "max_layout_passes must be at least 1".to_string(),
            ));
        }
        for name in self.defines.keys() {
            if name.is_empty() || name.contains(')') {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid define name '{}'",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Search paths resolved against the config file's directory
    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.paths
            .search
            .iter()
            .map(|path| match &self.base_dir {
                Some(base) if path.is_relative() => base.join(path),
                _ => path.clone(),
            })
            .collect()
    }

    /// Packer options derived from `[bundle]`
    pub fn pack_options(&self) -> PackOptions {
        PackOptions {
            chunk_size: self.bundle.chunk_size,
            endian: self.bundle.endian,
            fixups: self.bundle.fixups,
            sector_size: self.bundle.sector_size,
            pinned_order: self.bundle.pinned_order,
            max_layout_passes: self.bundle.max_layout_passes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = BundleConfig::from_str("").unwrap();
        assert_eq!(config.bundle, BundleSettings::default());
        assert_eq!(config.bundle.chunk_size, 32768);
        assert_eq!(config.bundle.fixups, FixupMode::Front);
        assert!(config.defines.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[bundle]
root = "main"
chunk_size = 2048
pad_size = 8
endian = "big"
dedup = false
fixups = "end"
sector_size = 512
pinned_order = true
duplicate_sections = "ignore"
max_layout_passes = 4

[paths]
search = ["data", "/abs/gfx"]

[defines]
LEVEL = "2"
"#;
        let mut config = BundleConfig::from_str(toml).unwrap();
        assert_eq!(config.bundle.root, "main");
        assert_eq!(config.bundle.endian, Endian::Big);
        assert_eq!(config.bundle.fixups, FixupMode::End);
        assert_eq!(config.bundle.duplicate_sections, DuplicatePolicy::Ignore);
        assert_eq!(config.defines.get("LEVEL").map(String::as_str), Some("2"));

        config.base_dir = Some(PathBuf::from("/proj"));
        assert_eq!(
            config.search_paths(),
            vec![PathBuf::from("/proj/data"), PathBuf::from("/abs/gfx")]
        );

        let options = config.pack_options();
        assert_eq!(options.chunk_size, 2048);
        assert_eq!(options.sector_size, 512);
        assert!(options.pinned_order);
    }

    #[test]
    fn test_validation_errors() {
        for toml in [
            "[bundle]\nchunk_size = 1002\n",
            "[bundle]\nchunk_size = 0\n",
            "[bundle]\nchunk_size = 8\n",
            "[bundle]\npad_size = 6\n",
            "[bundle]\nsector_size = 6\n",
            "[bundle]\nchunk_size = 256\nsector_size = 512\n",
            "[bundle]\nroot = \"\"\n",
            "[bundle]\nmax_layout_passes = 0\n",
        ] {
            let err = BundleConfig::from_str(toml).unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError(_)), "{}", toml);
        }
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = BundleConfig::from_str("[bundle]\nchunksize = 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
        let err = BundleConfig::from_str("[bundle]\nfixups = \"middle\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_from_file_sets_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lvlpak.toml");
        std::fs::write(&path, "[paths]\nsearch = [\"gfx\"]\n").unwrap();
        let config = BundleConfig::from_file(&path).unwrap();
        assert_eq!(config.search_paths(), vec![dir.path().join("gfx")]);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("end".parse::<FixupMode>(), Ok(FixupMode::End));
        assert!("sideways".parse::<FixupMode>().is_err());
    }
}
