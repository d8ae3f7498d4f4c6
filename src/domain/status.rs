//! Canonical equipment status vocabulary

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalized status all alarms and dashboards operate on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalStatus {
    Active,
    Pause,
    Stop,
    #[default]
    Unknown,
}

impl CanonicalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Pause => "PAUSE",
            Self::Stop => "STOP",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Valid as the target of a status mapping row
    pub fn is_mapping_target(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl FromStr for CanonicalStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "PAUSE" => Ok(Self::Pause),
            "STOP" => Ok(Self::Stop),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(format!("Unknown canonical status: {}", s)),
        }
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!("active".parse::<CanonicalStatus>().unwrap(), CanonicalStatus::Active);
        assert_eq!("Stop".parse::<CanonicalStatus>().unwrap(), CanonicalStatus::Stop);
        assert_eq!(CanonicalStatus::Pause.to_string(), "PAUSE");
        assert!("sleeping".parse::<CanonicalStatus>().is_err());
    }

    #[test]
    fn test_serialization() {
        assert_eq!(serde_json::to_string(&CanonicalStatus::Unknown).unwrap(), "\"UNKNOWN\"");
        let parsed: CanonicalStatus = serde_json::from_str("\"ACTIVE\"").unwrap();
        assert_eq!(parsed, CanonicalStatus::Active);
    }

    #[test]
    fn test_unknown_is_not_mapping_target() {
        assert!(!CanonicalStatus::Unknown.is_mapping_target());
        assert!(CanonicalStatus::Pause.is_mapping_target());
    }
}
