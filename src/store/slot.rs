//! Package slots: a closed two-variant set (spec.md §3), not an open string,
//! so an invalid slot name is rejected at the router boundary.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageSlot {
    Custom,
    Fallback,
}

impl PackageSlot {
    /// `fallback` is bundled and read-only; `custom` accepts writes/deletes.
    pub fn is_mutable(self) -> bool {
        matches!(self, PackageSlot::Custom)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PackageSlot::Custom => "custom",
            PackageSlot::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for PackageSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown slot {0:?}")]
pub struct UnknownSlot(pub String);

impl std::str::FromStr for PackageSlot {
    type Err = UnknownSlot;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "custom" => Ok(PackageSlot::Custom),
            "fallback" => Ok(PackageSlot::Fallback),
            other => Err(UnknownSlot(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_custom_is_mutable() {
        assert!(PackageSlot::Custom.is_mutable());
        assert!(!PackageSlot::Fallback.is_mutable());
    }

    #[test]
    fn parses_known_slots_only() {
        assert_eq!("custom".parse::<PackageSlot>().unwrap(), PackageSlot::Custom);
        assert_eq!("fallback".parse::<PackageSlot>().unwrap(), PackageSlot::Fallback);
        assert!("default".parse::<PackageSlot>().is_err());
    }
}
