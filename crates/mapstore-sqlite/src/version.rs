//! Semantic schema versions as stored in the `Admin` table.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

/// A `major.minor.patch` triple compared numerically, so `0.10.1 > 0.8.11`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    /// Stores without an `Admin` row, the oldest supported layout.
    pub const LEGACY: Self = Self::new(0, 0, 0);
    pub const V0_7_0: Self = Self::new(0, 7, 0);
    pub const V0_7_4: Self = Self::new(0, 7, 4);
    pub const V0_8_4: Self = Self::new(0, 8, 4);
    pub const V0_8_5: Self = Self::new(0, 8, 5);
    pub const V0_8_8: Self = Self::new(0, 8, 8);
    pub const V0_8_11: Self = Self::new(0, 8, 11);
    pub const V0_10_0: Self = Self::new(0, 10, 0);
    pub const V0_10_1: Self = Self::new(0, 10, 1);
    /// Layout written by the bundled baseline schema.
    pub const LATEST: Self = Self::V0_10_1;

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version string, falling back to [`SchemaVersion::LEGACY`]
    /// when it is not recognised.
    pub fn parse_or_legacy(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| {
            warn!(version = s, "unrecognized database version; using the oldest supported layout");
            Self::LEGACY
        })
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Error returned when a string has no leading numeric component.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version string {0:?}")]
pub struct ParseVersionError(pub String);

impl FromStr for SchemaVersion {
    type Err = ParseVersionError;

    /// Accepts one to three dot-separated components; missing components are
    /// zero and trailing non-digits in a component (`"1-dev"`) are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0u32; 3];
        let mut components = s.trim().split('.');
        for (i, slot) in parts.iter_mut().enumerate() {
            let Some(component) = components.next() else {
                if i == 0 {
                    return Err(ParseVersionError(s.to_string()));
                }
                break;
            };
            let digits: String = component.chars().take_while(|c| c.is_ascii_digit()).collect();
            *slot = digits
                .parse()
                .map_err(|_| ParseVersionError(s.to_string()))?;
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_is_numeric_not_lexicographic() {
        let ordered = [
            "0.0.0", "0.7.0", "0.7.4", "0.8.4", "0.8.5", "0.8.8", "0.8.11", "0.10.0", "0.10.1",
        ];
        let parsed: Vec<SchemaVersion> = ordered.iter().map(|s| s.parse().unwrap()).collect();
        for pair in parsed.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn short_versions_pad_with_zero() {
        assert_eq!("0.8".parse::<SchemaVersion>().unwrap(), SchemaVersion::new(0, 8, 0));
        assert_eq!("1".parse::<SchemaVersion>().unwrap(), SchemaVersion::new(1, 0, 0));
    }

    #[test]
    fn suffixes_are_ignored() {
        assert_eq!("0.10.1-dev".parse::<SchemaVersion>().unwrap(), SchemaVersion::V0_10_1);
    }

    #[test]
    fn garbage_falls_back_to_legacy() {
        assert!("".parse::<SchemaVersion>().is_err());
        assert!("abc".parse::<SchemaVersion>().is_err());
        assert_eq!(SchemaVersion::parse_or_legacy("not-a-version"), SchemaVersion::LEGACY);
    }

    #[test]
    fn display_roundtrip() {
        assert_eq!(SchemaVersion::V0_8_11.to_string(), "0.8.11");
        assert_eq!(SchemaVersion::LATEST.to_string(), "0.10.1");
    }
}
