//! Subcommand implementations.

pub mod build;
pub mod inspect;
pub mod load;

use lvlpak_engine::{BundleSettings, Endian};

/// Parse a decimal or `0x` hexadecimal `u32`
pub fn parse_u32(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => text.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", text, e))
}

/// Parse a `NAME=VALUE` define
pub fn parse_define(text: &str) -> Result<(String, String), String> {
    match text.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", text)),
    }
}

/// Chunk size and byte order for reading an existing bundle
pub fn bundle_format(chunk_size: Option<u32>, endian: Option<Endian>) -> (u32, Endian) {
    let defaults = BundleSettings::default();
    (
        chunk_size.unwrap_or(defaults.chunk_size),
        endian.unwrap_or(defaults.endian),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u32() {
        assert_eq!(parse_u32("2048"), Ok(2048));
        assert_eq!(parse_u32("0x8000"), Ok(0x8000));
        assert_eq!(parse_u32("0x1_0000"), Ok(0x1_0000));
        assert!(parse_u32("-4").is_err());
        assert!(parse_u32("0xZZ").is_err());
    }

    #[test]
    fn test_parse_define() {
        assert_eq!(
            parse_define("LEVEL=3"),
            Ok(("LEVEL".to_string(), "3".to_string()))
        );
        assert_eq!(parse_define("EMPTY="), Ok(("EMPTY".to_string(), String::new())));
        assert!(parse_define("=3").is_err());
        assert!(parse_define("LEVEL").is_err());
    }
}
