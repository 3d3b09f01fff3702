//! Solid color argument parsing.

use anyhow::{anyhow, bail, Result};
use std::fmt;

/// A solid RGB color requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorCommand {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl ColorCommand {
    /// Parse `RRGGBB`, optionally prefixed with `#`. Hex digits are case-insensitive.
    pub fn from_string(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);

        if digits.is_empty() {
            bail!("Color cannot be empty (expected RRGGBB, e.g. FF0000)");
        }
        if digits.chars().count() != 6 {
            bail!(
                "Color must be exactly 6 hex digits (RRGGBB), got {} in '{}'",
                digits.chars().count(),
                s
            );
        }
        if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
            bail!("Invalid hex digit '{}' in color '{}'", bad, s);
        }

        let bytes = hex::decode(digits).map_err(|e| anyhow!("Invalid color '{}': {}", s, e))?;
        match bytes.as_slice() {
            [red, green, blue] => Ok(Self {
                red: *red,
                green: *green,
                blue: *blue,
            }),
            _ => bail!("Color must decode to 3 bytes, got {}", bytes.len()),
        }
    }

    pub fn to_bytes(self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }
}

impl fmt::Display for ColorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.red, self.green, self.blue)
    }
}

/// clap value parser for the `set` color argument.
pub fn parse_color(s: &str) -> Result<ColorCommand> {
    ColorCommand::from_string(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_color_uppercase() {
        let color = ColorCommand::from_string("FF8000").unwrap();
        assert_eq!(color.to_bytes(), [0xFF, 0x80, 0x00]);
    }

    #[test]
    fn parse_color_lowercase_and_hash() {
        let a = ColorCommand::from_string("#00ff7f").unwrap();
        let b = ColorCommand::from_string("00FF7F").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.green, 0xFF);
        assert_eq!(a.blue, 0x7F);
    }

    #[test]
    fn parse_color_rejects_wrong_length() {
        for input in ["FFF", "FF00000", "#FF00", "FF00 00"] {
            let err = ColorCommand::from_string(input).unwrap_err();
            assert!(
                err.to_string().contains("exactly 6 hex digits"),
                "unexpected error for {input:?}: {err}"
            );
        }
    }

    #[test]
    fn parse_color_rejects_non_hex() {
        let err = ColorCommand::from_string("GG0000").unwrap_err();
        assert!(err.to_string().contains("Invalid hex digit 'G'"));

        let err = ColorCommand::from_string("ff00zz").unwrap_err();
        assert!(err.to_string().contains("Invalid hex digit 'z'"));
    }

    #[test]
    fn parse_color_rejects_empty() {
        assert!(ColorCommand::from_string("").is_err());
        assert!(ColorCommand::from_string("#").is_err());
        assert!(ColorCommand::from_string("   ").is_err());
    }

    #[test]
    fn parse_color_rejects_multibyte_chars() {
        // Six chars but not six bytes of hex.
        assert!(ColorCommand::from_string("ÿÿÿÿÿÿ").is_err());
    }

    #[test]
    fn display_is_uppercase_with_hash() {
        let color = ColorCommand::from_string("0a0b0c").unwrap();
        assert_eq!(color.to_string(), "#0A0B0C");
    }
}
